use anyhow::Result;

use infogempa_core::Config;
use infogempa_feed::{locations, FeedState, GempaSnapshot, InstallState};

mod context;

use context::AppContext;

fn summarize(state: &FeedState<GempaSnapshot>) -> String {
    let Some(snapshot) = &state.snapshot else {
        return match &state.error {
            Some(error) => format!("No earthquake data: {}", error),
            None => "Loading earthquake data...".to_string(),
        };
    };

    let latest = snapshot.data.latest.event();
    let mut line = format!(
        "{} recent earthquakes; latest M{} {}",
        snapshot.data.total_count(),
        latest.magnitude,
        latest.wilayah
    );
    if let Some(age) = snapshot.age_display() {
        line.push_str(&format!(" (updated {})", age));
    }
    if !state.online {
        line.push_str(" [offline]");
    }
    if let Some(error) = &state.error {
        line.push_str(&format!(" [{}]", error));
    }
    line
}

#[tokio::main]
async fn main() -> Result<()> {
    infogempa_core::init()?;

    let (config, _) = Config::load_validated()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let standalone = args.iter().any(|arg| arg == "--standalone");
    let city = args
        .iter()
        .position(|arg| arg == "--city")
        .and_then(|i| args.get(i + 1));

    let app = AppContext::start(config, standalone).await?;

    if let Some(query) = city {
        match locations::search(query).first() {
            Some(found) => app.select_location(found.to_record()).await?,
            None => tracing::warn!("Unknown city '{}', keeping current location", query),
        }
    }

    let location = app.locations().current()?;
    println!("InfoGempa - {}, {}", location.city, location.province);
    println!("  Data directory: {}", app.config().storage.data_dir.display());
    println!(
        "  Offline cache: {} ({})",
        app.worker().version(),
        app.worker().state()
    );
    if app.install_flow().lock().await.state() == InstallState::Installed {
        println!("  Running as installed app");
    }

    let mut gempa = app.gempa().subscribe();
    let mut online = app.connectivity().subscribe();
    let mut watching = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = online.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                if *online.borrow_and_update() {
                    println!("Back online");
                } else {
                    println!("Offline, showing saved data");
                }
            }
            changed = gempa.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = gempa.borrow_and_update().clone();
                if state.loading {
                    continue;
                }
                println!("{}", summarize(&state));

                if let Some(weather) = app.weather_state().await {
                    if let Some(entry) = weather.data().and_then(|f| f.current()) {
                        let condition = entry
                            .condition()
                            .map(|c| c.description.as_str())
                            .unwrap_or("-");
                        println!("  {:.1}°C, {}", entry.main.temp, condition);
                    }
                }
            }
        }
    }

    app.shutdown().await;
    Ok(())
}
