// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting and subscriber setup.
//!
//! Every line is prefixed with `DD_MONITOR` so monitor output can be picked out of
//! the host application's logs:
//!
//! ```text
//! DD_MONITOR | LEVEL | [span_name{span_fields}:] message {event_fields}
//! DD_MONITOR | WARN | Collector cgroup_cpu failed on tick 12: cpuacct.usage not found
//! ```

use crate::errors::MonitorError;
use std::fmt;
use tracing::debug;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub const LOG_PREFIX: &str = "DD_MONITOR";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Parses a log level or full filter directive such as `info,datadog_metrics_monitor=debug`.
pub fn env_filter(log_level: &str) -> Result<EnvFilter, MonitorError> {
    EnvFilter::try_new(log_level).map_err(|e| {
        MonitorError::InvalidConfig(format!("could not parse log level '{log_level}': {e}"))
    })
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(log_level: &str) -> Result<(), MonitorError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(log_level)?)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        MonitorError::InvalidConfig(format!("setting default subscriber failed: {e}"))
    })?;

    debug!("Logging subsystem enabled");
    Ok(())
}
