//! Example: Load a gateway with its Zigbee children and print property changes.

use miio_lan_bridge::{DeviceConfig, DeviceEvent, Hub};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = DeviceConfig::builder()
        .id("gateway")
        .host("192.168.1.10")
        .token("00112233445566778899aabbccddeeff")
        .did("123456789")
        .model("lumi.gateway.mgl03")
        .build();

    let mut hub = Hub::new();
    let mut events = hub.subscribe();
    hub.setup(&[config]).await;

    println!("\n--- Devices ---");
    for device in hub.discover().await {
        println!("  {:24} {:28} {}", device.device, device.model, device.properties);
    }

    println!("\nListening for updates (Ctrl+C to stop)...\n");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(DeviceEvent::Updated { device_id, changes, .. }) => {
                        println!("{}:", device_id);
                        for (name, value) in changes {
                            println!("  {} = {}", name, value);
                        }
                    }
                    Ok(DeviceEvent::ChildrenLoaded { gateway_id, count }) => {
                        println!("{} reloaded {} children", gateway_id, count);
                    }
                    Err(e) => {
                        println!("Event error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    hub.shutdown().await;
    Ok(())
}
