// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Built-in collectors for Linux hosts.
//!
//! - [`CgroupCpuCollector`]: cgroup v1 CPU usage and limit
//! - [`ProcessUsageCollector`]: open file descriptors and threads of a process
//!
//! Both write into the [`MetricStore`](crate::store::MetricStore) they are built with.

pub mod cgroup_cpu;
pub mod process;

pub use cgroup_cpu::{parse_cpuset, CgroupCpuCollector, CgroupPaths};
pub use process::ProcessUsageCollector;
