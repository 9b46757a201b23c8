use super::{SurplusDriver, bounded};
use super::snapshot::{SourceHealth, house_load_watts};
use crate::aggregator::{Reading, SourceKind};
use crate::devices::{ChargerStatus, Devices};
use crate::error::{PvSurplusError, Result};

impl SurplusDriver {
    /// Sample every device once, feed the windows and publish a snapshot.
    /// A failed device keeps its previous value and is flagged stale.
    pub(crate) async fn fast_tick(&mut self) {
        let limit = self.device_timeout();
        let Devices {
            pv,
            grid,
            wallbox,
            charger,
        } = &mut self.devices;

        let (pv_result, grid_result, wallbox_result, status_result) = tokio::join!(
            bounded(limit, "pv", pv.read()),
            bounded(limit, "grid", grid.read()),
            bounded(limit, "wallbox", wallbox.read()),
            bounded(limit, "charger", charger.status()),
        );

        self.absorb_reading(SourceKind::Pv, pv_result);
        self.absorb_reading(SourceKind::Grid, grid_result);
        self.absorb_reading(SourceKind::Wallbox, wallbox_result);
        self.absorb_status(status_result);

        let snap = &mut self.snapshot;
        snap.surplus_watts = self
            .controller
            .surplus_watts(snap.grid_watts, snap.wallbox_watts);
        snap.house_load_watts = house_load_watts(snap.pv_watts, snap.grid_watts, snap.wallbox_watts);
        snap.total_ticks = snap.total_ticks.saturating_add(1);

        self.logger.trace(&format!(
            "Tick {}: pv={:.0}W grid={:.0}W wallbox={:.0}W surplus={:.0}W",
            snap.total_ticks, snap.pv_watts, snap.grid_watts, snap.wallbox_watts, snap.surplus_watts
        ));
        self.publish();
    }

    fn absorb_reading(&mut self, kind: SourceKind, result: Result<Reading>) {
        match result {
            Ok(reading) if reading.source_kind == kind => {
                let (value, health) = self.source_slot(kind);
                *value = reading.watts;
                health.record_success();
                self.aggregator.record(reading);
            }
            Ok(reading) => {
                let err = PvSurplusError::source_unavailable(
                    kind.as_str(),
                    format!("adapter returned a {} reading", reading.source_kind),
                );
                self.record_source_failure(kind, err);
            }
            Err(e) => {
                let err = match e {
                    PvSurplusError::SourceUnavailable { .. } => e,
                    other => PvSurplusError::source_unavailable(kind.as_str(), other.to_string()),
                };
                self.record_source_failure(kind, err);
            }
        }
    }

    fn record_source_failure(&mut self, kind: SourceKind, err: PvSurplusError) {
        let (_, health) = self.source_slot(kind);
        health.record_failure(err.to_string());
        let consecutive = health.consecutive_failures;
        // Log the first failure loudly; repeats only at debug
        if consecutive == 1 {
            self.logger.warn(&format!("{}; keeping last value", err));
        } else {
            self.logger
                .debug(&format!("{} (failure {} in a row)", err, consecutive));
        }
    }

    fn absorb_status(&mut self, result: Result<ChargerStatus>) {
        match result {
            Ok(status) => {
                self.snapshot.vehicle_state = status.vehicle_state;
                self.snapshot.phase = status.phase.or(self.snapshot.phase);
                self.snapshot.current_amps = status.ampere_allowed.or(self.snapshot.current_amps);
                self.snapshot.sources.charger.record_success();
            }
            Err(e) => {
                let health = &mut self.snapshot.sources.charger;
                health.record_failure(e.to_string());
                if health.consecutive_failures == 1 {
                    self.logger
                        .warn(&format!("Charger status unavailable: {}", e));
                }
            }
        }
    }

    fn source_slot(&mut self, kind: SourceKind) -> (&mut f64, &mut SourceHealth) {
        let snap = &mut self.snapshot;
        match kind {
            SourceKind::Pv => (&mut snap.pv_watts, &mut snap.sources.pv),
            SourceKind::Grid => (&mut snap.grid_watts, &mut snap.sources.grid),
            SourceKind::Wallbox => (&mut snap.wallbox_watts, &mut snap.sources.wallbox),
        }
    }
}
