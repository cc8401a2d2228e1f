use chatrelay::{Mode, ProviderStatus, RelayClient, RelayConfig, config};

/// Probe every configured provider and report which ones answer.
pub async fn run_doctor(client: &RelayClient, settings: &RelayConfig) -> anyhow::Result<()> {
    let statuses = client.provider_status(true).await;
    if statuses.is_empty() {
        println!("No providers enabled. Run `chatrelay-proxy init-config` and edit the file.");
        return Ok(());
    }

    println!("Checking {} provider(s)...\n", statuses.len());
    let mut healthy = 0;
    for status in &statuses {
        let override_key = settings.provider(&status.name).api_key;
        let has_key = config::resolve_api_key(&status.name, override_key.as_deref()).is_some();
        let verdict = match status.available {
            Some(true) => {
                healthy += 1;
                "✅ reachable"
            }
            Some(false) if !has_key => "❌ no credentials",
            Some(false) => "❌ unreachable or credentials rejected",
            None => "⚠️  not probed",
        };
        println!("  {:<12} {}  [{}]", status.name, verdict, modes_label(status));
    }

    for mode in Mode::ALL {
        if !statuses.iter().any(|s| s.modes.contains(&mode)) {
            println!("\n  ⚠️  no provider serves {} requests", mode);
        }
    }

    println!("\n{}/{} providers reachable.", healthy, statuses.len());
    Ok(())
}

/// Print the registry for one mode (or all), highest priority first.
pub async fn print_providers(client: &RelayClient, mode: Option<Mode>) {
    let statuses = client.provider_status(false).await;
    for status in statuses
        .iter()
        .filter(|s| mode.is_none_or(|m| s.modes.contains(&m)))
    {
        println!("{}", status_line(status));
    }
}

pub fn status_line(status: &ProviderStatus) -> String {
    let cooldown = match status.cooldown_remaining_secs {
        Some(secs) => format!("cooling down ({}s left)", secs),
        None if status.attempts > 0 => format!("{} recent failure(s)", status.attempts),
        None => "ready".to_string(),
    };
    format!(
        "{:>3}  {:<12} {:<28} {}",
        status.priority,
        status.name,
        modes_label(status),
        cooldown
    )
}

fn modes_label(status: &ProviderStatus) -> String {
    status
        .modes
        .iter()
        .map(Mode::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
