// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Alert Sinks
//!
//! Delivery backends for the reporting stage. [`LogAlertSink`] writes alerts
//! to the log; [`SpoolingAlertSink`] decouples delivery from the pipeline by
//! spooling alerts to a dedicated thread over a channel, which keeps slow
//! transports off the worker threads while preserving at-least-once
//! delivery order.

use catalog_pipeline_domain::{Alert, AlertSink};
use crossbeam::channel::{unbounded, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, warn};

/// Writes alerts to the log at warn level.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl LogAlertSink {
    pub fn new() -> Self {
        Self
    }
}

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: Alert) {
        match &alert.title {
            Some(title) => warn!("ALERT [{title}] {}: rule ({}) | {}", alert.entry, alert.rule, alert.values),
            None => warn!("ALERT {}: rule ({}) | {}", alert.entry, alert.rule, alert.values),
        }
    }
}

/// Hands alerts to a dedicated delivery thread.
///
/// `raise` never blocks the calling worker; the wrapped sink sees alerts in
/// the order they were raised. Dropping the spool joins the delivery thread
/// after the queue drains.
pub struct SpoolingAlertSink {
    sender: Option<Sender<Alert>>,
    delivery: Option<JoinHandle<()>>,
}

impl SpoolingAlertSink {
    pub fn new(inner: Arc<dyn AlertSink>) -> Self {
        let (sender, receiver) = unbounded::<Alert>();
        let delivery = std::thread::Builder::new()
            .name("alert-delivery".to_string())
            .spawn(move || {
                for alert in receiver {
                    inner.raise(alert);
                }
            })
            .ok();
        if delivery.is_none() {
            error!("cannot start the alert delivery thread; alerts will be dropped");
        }
        Self {
            sender: Some(sender),
            delivery,
        }
    }
}

impl AlertSink for SpoolingAlertSink {
    fn raise(&self, alert: Alert) {
        if let Some(sender) = &self.sender {
            if sender.send(alert).is_err() {
                error!("alert delivery thread is gone, alert dropped");
            }
        }
    }
}

impl Drop for SpoolingAlertSink {
    fn drop(&mut self) {
        // closing the channel lets the delivery thread drain and exit
        self.sender.take();
        if let Some(handle) = self.delivery.take() {
            if handle.join().is_err() {
                error!("alert delivery thread panicked");
            }
        }
    }
}
