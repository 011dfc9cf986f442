use livex::{LiveApi, LiveApiConfig};
use std::time::Duration;

const TICKS_TO_PRINT: usize = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let symbol = std::env::args().nth(1).unwrap_or_else(|| "R_100".to_string());

    // LIVE_API_ENDPOINT, LIVE_API_LANGUAGE, LIVE_API_APP_ID, LIVE_API_API_TOKEN
    #[cfg(feature = "env-file")]
    let config = LiveApiConfig::from_env_file("LIVE_API")?;
    #[cfg(not(feature = "env-file"))]
    let config = LiveApiConfig::from_env("LIVE_API")?;
    let api = LiveApi::connect(config)?;

    let mut ticks = api.on("tick");
    let mut errors = api.on(livex::ERROR_CHANNEL);

    println!("Subscribing to {}...", symbol);
    let first = api.subscribe_to_tick(&symbol).await?;
    println!("Subscribed: {}", first["tick"]);

    let mut printed = 0;
    while printed < TICKS_TO_PRINT {
        tokio::select! {
            tick = ticks.recv() => {
                let tick = tick?;
                println!(
                    "{} {} @ {}",
                    tick["tick"]["symbol"], tick["tick"]["quote"], tick["tick"]["epoch"]
                );
                printed += 1;
            }
            error = errors.recv() => {
                println!("Error frame: {}", error?["error"]);
                break;
            }
            () = tokio::time::sleep(Duration::from_secs(30)) => {
                println!("No ticks within 30s, giving up");
                break;
            }
        }
    }

    api.disconnect()?;
    Ok(())
}
