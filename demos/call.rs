//! Example: Query a device's identity and issue one raw call.

use miio_lan_bridge::{DeviceConfig, ProtocolClient};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = DeviceConfig::builder()
        .id("humidifier")
        .host("192.168.1.50")
        .token("00112233445566778899aabbccddeeff")
        .build();

    let client = ProtocolClient::connect(&config).await?;

    let info = client.info().await?;
    println!("Model:    {}", info.model);
    println!("MAC:      {}", info.mac.as_deref().unwrap_or("-"));
    println!("Firmware: {}", info.fw_ver.as_deref().unwrap_or("-"));

    let result = client
        .call("get_prop", json!(["power", "mode", "temp_dec", "humidity", "depth"]))
        .await?;
    if result.is_ok() {
        println!("Properties: {}", result.data);
    } else if let Some(err) = result.vendor_error() {
        println!("Device error {}: {}", err.code, err.message);
    } else {
        println!("Call failed: {} {}", result.code, result.data);
    }

    client.shutdown();
    Ok(())
}
