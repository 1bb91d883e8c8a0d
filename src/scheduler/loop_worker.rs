use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Alarm;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Fires `name` every `period` until cancelled or the receiver goes away.
/// The first alarm fires one full period after the loop starts.
pub async fn alarm_loop(
    name: String,
    period: Duration,
    alarms: mpsc::UnboundedSender<Alarm>,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    // A suspended process wakes to one alarm, not a burst of catch-up alarms.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                log_debug!("alarm '{}' fired", name);
                if alarms.send(Alarm { name: name.clone() }).is_err() {
                    log_warn!("alarm '{}' has no listener; stopping", name);
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("alarm '{}' cancelled", name);
                break;
            }
        }
    }
}
