use super::*;

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.100".to_string(),
            port: 502,
            unit_id: 1,
        }
    }
}

impl Default for PvConfig {
    fn default() -> Self {
        Self {
            modbus: ModbusConfig {
                ip: "192.168.1.50".to_string(),
                port: 1502,
                unit_id: 71,
            },
            total_power_register: 172,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.60".to_string(),
            meter_key: "MT631".to_string(),
            power_field: "Power_cur".to_string(),
        }
    }
}

impl Default for WallboxConfig {
    fn default() -> Self {
        Self {
            source: WallboxSourceKind::Modbus,
            modbus: ModbusConfig {
                ip: "192.168.1.70".to_string(),
                port: 502,
                unit_id: 1,
            },
            power_register: 120,
            max_plausible_watts: 11_000.0,
        }
    }
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.70".to_string(),
        }
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            voltage: 230.0,
            min_current_amps: 6.0,
            max_current_amps: 16.0,
            current_step_amps: 1.0,
            start_threshold_watts: None,
            start_stop_margin_watts: 200.0,
            phase_switch_margin_watts: 200.0,
            initial_three_phase_watts: None,
            safety_margin_watts: 0.0,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            evaluation_interval_secs: 300,
            window_secs: 300,
            device_timeout_ms: 2000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/pvsurplus.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pv: PvConfig::default(),
            grid: GridConfig::default(),
            wallbox: WallboxConfig::default(),
            charger: ChargerConfig::default(),
            controls: ControlsConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
            initial_mode: OperatingMode::PvSurplus,
        }
    }
}
