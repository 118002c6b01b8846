// MIT License - Copyright (c) 2026 Peter Wright
// Protocol constants

/// Packet magic, first two bytes of every control-protocol packet.
pub const MAGIC: u16 = 0x2131;

/// Size of the fixed packet header.
pub const HEADER_LEN: usize = 32;

/// UDP port every device listens on for control packets.
pub const CONTROL_PORT: u16 = 54321;

/// Discovery "hello": magic, length 0x0020, every other byte 0xFF.
pub const HELLO_PACKET: [u8; HEADER_LEN] = [
    0x21, 0x31, 0x00, 0x20, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

/// Checksum field value marking a handshake acknowledgement.
pub const ACK_CHECKSUM: [u8; 16] = [0xff; 16];

/// A negotiated handshake is usable for this many seconds.
pub const HANDSHAKE_TTL_SECS: u64 = 300;

/// Default wait for a handshake acknowledgement.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 3000;

/// Default wait for a call reply.
pub const CALL_TIMEOUT_MS: u64 = 5000;

/// Request ids are drawn uniformly from this range (9-10 digits).
pub const REQUEST_ID_MIN: u32 = 100_000_000;
pub const REQUEST_ID_MAX: u32 = 1_100_000_000;

/// Status code used for timeouts and locally generated failures.
pub const STATUS_FAILURE: i64 = -1;

/// MQTT broker port on the gateway carrying Zigbee reports.
pub const REPORT_PORT: u16 = 1883;

/// Topic the gateway publishes Zigbee reports and heartbeats on.
pub const REPORT_TOPIC: &str = "zigbee/send";

/// Upper bound on `get_device_list` round trips during one enumeration.
pub const MAX_LIST_PAGES: usize = 64;

/// Known device models.
pub const MODEL_GATEWAY: &str = "lumi.gateway.mgl03";
pub const MODEL_HUMIDIFIER: &str = "zhimi.humidifier.ca1";

/// Gateway alarm siren property (MIoT service/property ids).
pub const ALARM_SIID: u32 = 3;
pub const ALARM_PIID: u32 = 22;

/// Zigbee resource names.
pub mod res {
    pub const TEMPERATURE: &str = "0.1.85";
    pub const HUMIDITY: &str = "0.2.85";
    pub const PRESSURE: &str = "0.3.85";
    /// Motion detected (motion sensor) or contact open (magnet sensor).
    pub const STATE: &str = "3.1.85";
    pub const BATTERY_VOLTAGE: &str = "8.0.2008";
}
