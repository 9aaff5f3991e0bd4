//! Callback dispatcher.
//!
//! A single task drains the inbound queue, applies each item to driver state
//! and delivers the resulting callback before taking the next item. This is
//! the only place scheduler callbacks run, which gives the framework strict
//! per-driver ordering without locks of its own.
//!
//! Driver state is never locked while a callback runs, so callbacks may call
//! back into the driver freely.

use skiff_id::{FrameworkId, OfferId};
use skiff_protocol::{InboundReceiver, MasterInfo, Offer, TaskStatus};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::DriverState;
use crate::driver::Driver;
use crate::scheduler::{Scheduler, SchedulerDriver};

/// A callback ready for delivery.
#[derive(Debug, Clone)]
pub(crate) enum Callback {
    Registered {
        framework_id: FrameworkId,
        master: MasterInfo,
    },
    Heartbeated,
    ResourceOffers(Vec<Offer>),
    OfferRescinded(OfferId),
    StatusUpdate(TaskStatus),
    Error(String),
}

impl Callback {
    fn kind(&self) -> &'static str {
        match self {
            Callback::Registered { .. } => "registered",
            Callback::Heartbeated => "heartbeated",
            Callback::ResourceOffers(_) => "resource_offers",
            Callback::OfferRescinded(_) => "offer_rescinded",
            Callback::StatusUpdate(_) => "status_update",
            Callback::Error(_) => "error",
        }
    }

    async fn deliver(self, scheduler: &mut dyn Scheduler, driver: &dyn SchedulerDriver) {
        match self {
            Callback::Registered {
                framework_id,
                master,
            } => scheduler.registered(driver, &framework_id, &master).await,
            Callback::Heartbeated => scheduler.heartbeated(driver).await,
            Callback::ResourceOffers(offers) => scheduler.resource_offers(driver, &offers).await,
            Callback::OfferRescinded(offer_id) => {
                scheduler.offer_rescinded(driver, &offer_id).await
            }
            Callback::StatusUpdate(status) => scheduler.status_update(driver, &status).await,
            Callback::Error(message) => scheduler.error(driver, &message).await,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Run the dispatcher until the driver stops.
pub(crate) async fn run(
    driver: Driver,
    mut scheduler: Box<dyn Scheduler>,
    mut inbound: InboundReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Callback dispatcher started");
    let mut delivered: u64 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let deadline = driver.next_deadline().await;
        let mut closing = false;

        let callback = tokio::select! {
            biased;

            // Check shutdown first
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }

            item = inbound.recv() => match item {
                Some(item) => driver.ingest(item).await,
                None => {
                    warn!("Inbound queue closed by transport");
                    closing = true;
                    driver.on_inbound_closed().await
                }
            },

            _ = sleep_until(deadline) => driver.on_timer().await,
        };

        if let Some(callback) = callback {
            // Only the error callback may follow a stop
            let is_error = matches!(callback, Callback::Error(_));
            if !is_error && driver.state() == DriverState::Stopped {
                break;
            }

            debug!(callback = callback.kind(), "Delivering callback");
            callback.deliver(scheduler.as_mut(), &driver).await;
            delivered += 1;
        }

        if closing {
            break;
        }
    }

    info!(delivered, "Callback dispatcher stopped");
}
