use pvsurplus::config::ModbusConfig;
use pvsurplus::modbus::{ModbusClient, decode_32bit_float_word_swapped, decode_u32};
use std::time::Duration;

#[test]
fn modbus_client_starts_disconnected() {
    let cfg = ModbusConfig::default();
    let client = ModbusClient::new(&cfg, Duration::from_secs(1));
    assert!(!client.is_connected());
}

#[test]
fn decode_word_swapped_float_happy_path() {
    let regs = [0x0000u16, 0x3F80u16];
    assert!((decode_32bit_float_word_swapped(&regs).unwrap() - 1.0).abs() < f32::EPSILON);
}

#[test]
fn decode_u32_happy_path() {
    assert_eq!(decode_u32(&[0x0001, 0x86A0]).unwrap(), 100_000);
}

#[test]
fn decoders_reject_short_input() {
    assert!(decode_32bit_float_word_swapped(&[0x3F80]).is_err());
    assert!(decode_u32(&[]).is_err());
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let cfg = ModbusConfig {
        ip: "127.0.0.1".to_string(),
        port,
        unit_id: 1,
    };
    let mut client = ModbusClient::new(&cfg, Duration::from_millis(500));
    assert!(client.connect().await.is_err());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn cancelled_read_leaves_no_stale_connection() {
    use pvsurplus::modbus::RegisterReader;

    // Accepts the TCP connection but never answers a request
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            held.push(socket);
        }
    });

    let cfg = ModbusConfig {
        ip: "127.0.0.1".to_string(),
        port,
        unit_id: 1,
    };
    let mut client = ModbusClient::new(&cfg, Duration::from_secs(5));

    // The caller gives up well before the client's own read timeout
    let cancelled = tokio::time::timeout(
        Duration::from_millis(200),
        client.read_holding_registers(172, 2),
    )
    .await;
    assert!(cancelled.is_err());
    assert!(!client.is_connected());

    server.abort();
}
