use std::path::PathBuf;

use adcraft_backend::api::server::serve;
use adcraft_backend::default_app_root;
use adcraft_backend::settings::{load_app_settings, AppSettings};
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if matches!(
        cli_args.first().map(String::as_str),
        Some("validate-settings")
    ) {
        run_validate_settings_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
        return Ok(());
    }
    if !cli_args.is_empty() {
        return Err(std::io::Error::other(format!(
            "Unknown command: {}\n\nRun without arguments to start the server, or use validate-settings --help.",
            cli_args[0]
        ))
        .into());
    }

    let settings = load_settings(&SettingsCliArgs::default())?;
    serve(settings).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SettingsCliArgs {
    app_root: Option<PathBuf>,
    settings_path: Option<String>,
}

fn parse_settings_cli_args(args: &[String]) -> Result<SettingsCliArgs, Box<dyn std::error::Error>> {
    let mut parsed = SettingsCliArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--app-root" => {
                parsed.app_root = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--settings" => {
                parsed.settings_path = Some(needs_value(i)?);
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }
    Ok(parsed)
}

fn load_settings(args: &SettingsCliArgs) -> Result<AppSettings, Box<dyn std::error::Error>> {
    let app_root = args.app_root.clone().unwrap_or_else(default_app_root);
    let settings = load_app_settings(app_root.as_path(), args.settings_path.as_deref(), |key| {
        std::env::var(key).ok()
    })?;
    Ok(settings)
}

fn run_validate_settings_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_validate_settings_usage();
        return Ok(());
    }

    let parsed = parse_settings_cli_args(args.as_slice())?;
    let settings = load_settings(&parsed)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "bind": settings.bind_addr()?.to_string(),
            "settings": settings,
        }))?
    );
    Ok(())
}

fn print_validate_settings_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  adcraft-backend validate-settings [--app-root PATH] [--settings PATH]\n\n",
        "Defaults:\n",
        "  --app-root defaults to $ADCRAFT_APP_ROOT, then the working directory\n",
        "  settings default: $ADCRAFT_SETTINGS, then config/adcraft.settings.toml under the app root\n",
        "  PORT, ADCRAFT_BIND_HOST and ADCRAFT_PUBLIC_URL override the file\n"
    ));
}
