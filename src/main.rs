// Command line lookup of vehicle tax records on the Paga Facil portal

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::error;
use tenencia::config::ProxyConfig;
use tenencia::retry::RetryPolicy;
use tenencia::utils::Deadline;
use tenencia::validation::{PlateValidator, VinValidator};
use tenencia::{ScraperConfig, ScraperError, TaxScraper, VehicleResult};

#[derive(Parser)]
#[command(name = "tenencia")]
#[command(about = "Look up vehicle tax (tenencia/refrendo) records by plate and VIN")]
#[command(version)]
struct Cli {
    /// License plate, e.g. FKY171B.
    plate: String,

    /// Vehicle identification number (NIV/serie).
    #[arg(long, visible_alias = "vin")]
    niv: String,

    // Environment variables are read by ScraperConfig::from_env; these flags override them.

    /// Portal base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Form path relative to the base URL.
    #[arg(long)]
    form_url: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Full form/captcha/submit cycles.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// OCR attempts inside one cycle.
    #[arg(long)]
    captcha_attempts: Option<u32>,

    /// Overall time budget for the query, in seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    #[arg(long)]
    proxy_host: Option<String>,

    #[arg(long)]
    proxy_port: Option<u16>,

    #[arg(long)]
    proxy_username: Option<String>,

    #[arg(long)]
    proxy_password: Option<String>,

    /// Directory where raw captchas and candidate bitmaps are written.
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Pretty-print the JSON result.
    #[arg(long)]
    pretty: bool,
}

impl Cli {
    /// Environment configuration with the explicit command line flags on top.
    fn scraper_config(&self) -> Result<ScraperConfig, ScraperError> {
        Ok(self.apply_overrides(ScraperConfig::from_env()?))
    }

    fn apply_overrides(&self, mut config: ScraperConfig) -> ScraperConfig {
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(form_url) = &self.form_url {
            config.form_path = form_url.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.max_attempts {
            config.outer_retry = RetryPolicy::new(attempts, config.outer_retry.delay);
        }
        if let Some(attempts) = self.captcha_attempts {
            config.inner_retry = RetryPolicy::new(attempts, config.inner_retry.delay);
        }

        if let (Some(host), Some(port)) = (&self.proxy_host, self.proxy_port) {
            config.proxy = Some(ProxyConfig {
                host: host.clone(),
                port,
                username: None,
                password: None,
            });
        }
        if let Some(proxy) = config.proxy.as_mut() {
            if self.proxy_username.is_some() {
                proxy.username = self.proxy_username.clone();
            }
            if self.proxy_password.is_some() {
                proxy.password = self.proxy_password.clone();
            }
        }

        if self.debug_dir.is_some() {
            config.debug_dir = self.debug_dir.clone();
        }

        config
    }
}

fn labelled(label: &str, err: ScraperError) -> ScraperError {
    match err {
        ScraperError::InvalidInput(message) => ScraperError::InvalidInput(format!("{}: {}", label, message)),
        other => other,
    }
}

fn validated_inputs(cli: &Cli) -> Result<(String, String), ScraperError> {
    let plate = PlateValidator::validate(&cli.plate).map_err(|e| labelled("Plate", e))?;
    let vin = VinValidator::validate(&cli.niv).map_err(|e| labelled("VIN", e))?;
    Ok((plate, vin))
}

fn print_result(result: &VehicleResult, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(result)
    } else {
        serde_json::to_string(result)
    };
    match rendered {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize result: {}", e),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let prepared = validated_inputs(&cli).and_then(|inputs| Ok((inputs, cli.scraper_config()?)));
    let result = match prepared {
        Ok(((plate, vin), config)) => {
            let deadline = cli
                .deadline_secs
                .map(|secs| Deadline::after(Duration::from_secs(secs)))
                .unwrap_or_default();
            TaxScraper::new(config).solve_with_deadline(&plate, &vin, deadline)
        }
        Err(e) => {
            error!("{}", e);
            VehicleResult::failure(e.to_string())
        }
    };

    print_result(&result, cli.pretty);

    if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
