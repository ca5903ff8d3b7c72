use ecu_core::assignment::SyncWidth;
use ecu_core::engine::ResyncOutcome;
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Ticker};

use super::{FirmwareEngine, RESYNC_REQUESTS, TELEMETRY};
use crate::board;
use crate::hw::timer;
use crate::status;
use crate::telemetry::FirmwareInstant;

/// Overdwell protection, the tacho sweep and deferred resync retries.
#[embassy_executor::task]
pub async fn run(engine: &'static FirmwareEngine, dwell_limit: u32) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(board::HOUSEKEEPING_PERIOD_MS));
    let mut pending: Option<SyncWidth> = None;

    loop {
        if let Either::Second(width) = select(ticker.next(), RESYNC_REQUESTS.wait()).await {
            pending = Some(width);
        }
        let now = FirmwareInstant::now();

        let forced = engine.enforce_dwell_limit(timer::counter(), dwell_limit);
        if forced != 0 {
            status::record_overdwell(forced);
            TELEMETRY.record_overdwell(forced, now);
        }

        engine
            .bank()
            .service_tacho(board::wrapping_millis(now.into_embassy().as_millis()));

        if let Some(width) = pending {
            let report = match width {
                SyncWidth::Half => engine.change_full_to_half_sync(),
                SyncWidth::Full => engine.change_half_to_full_sync(),
            };
            let applied = [report.fuel, report.ignition].contains(&ResyncOutcome::Applied);
            if applied || !report.is_deferred() {
                TELEMETRY.record_resync(width, report, now);
            }
            if report.is_deferred() {
                status::record_deferred_resync();
            } else {
                pending = None;
            }
        }
    }
}
