use pvsurplus::error::PvSurplusError;

#[test]
fn error_constructors_group_1() {
    assert!(matches!(
        PvSurplusError::config("x"),
        PvSurplusError::Config { .. }
    ));
    assert!(matches!(
        PvSurplusError::validation("f", "m"),
        PvSurplusError::Validation { .. }
    ));
    assert!(matches!(
        PvSurplusError::source_unavailable("grid", "x"),
        PvSurplusError::SourceUnavailable { .. }
    ));
    assert!(matches!(
        PvSurplusError::actuator("x"),
        PvSurplusError::ActuatorFailure { .. }
    ));
}

#[test]
fn error_constructors_group_2() {
    assert!(matches!(
        PvSurplusError::modbus("x"),
        PvSurplusError::Modbus { .. }
    ));
    assert!(matches!(
        PvSurplusError::network("x"),
        PvSurplusError::Network { .. }
    ));
    assert!(matches!(
        PvSurplusError::timeout("x"),
        PvSurplusError::Timeout { .. }
    ));
    assert!(matches!(PvSurplusError::io("x"), PvSurplusError::Io { .. }));
}

#[test]
fn display_names_the_source() {
    let err = PvSurplusError::source_unavailable("wallbox", "no answer");
    assert_eq!(err.to_string(), "Source unavailable: wallbox - no answer");
}

#[test]
fn io_and_json_errors_convert() {
    let io = std::io::Error::other("disk");
    assert!(matches!(PvSurplusError::from(io), PvSurplusError::Io { .. }));
    let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(
        PvSurplusError::from(json),
        PvSurplusError::Serialization { .. }
    ));
}
