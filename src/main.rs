use clap::{Parser, Subcommand};
use serial_transport::config::ConfigLoader;
use serial_transport::device::DeviceSettings;
use serial_transport::error::{AppError, AppResult};
use serial_transport::{logging, PortRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Send commands to serial instruments and read their answers.",
    long_about = "Lists serial ports and runs single command/answer exchanges over a \
                  full-duplex serial transport. Settings come from serial-transport.toml \
                  and SERIAL_TRANSPORT_* environment variables."
)]
struct Args {
    /// Configuration file to use instead of the standard search path.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports available for opening.
    List,

    /// Send one command and print the answer.
    Send {
        /// Port name or configured alias.
        #[arg(short, long)]
        port: String,

        /// Baud rate (defaults to the configured one).
        #[arg(short, long)]
        baud: Option<u32>,

        /// Terminator appended to the command and expected after the answer.
        /// Accepts \r, \n, \t and \\ escapes.
        #[arg(short, long, default_value = "\\r")]
        terminator: String,

        /// Answer timeout in milliseconds (defaults to the configured one).
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Maximum answer length in bytes, terminator included.
        #[arg(long, default_value_t = 1024)]
        max_len: usize,

        /// Command text.
        command: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> AppResult<()> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    logging::init(&loader.config().logging)?;
    if let Some(path) = &loader.config_path {
        tracing::debug!(path = %path.display(), "Loaded configuration");
    }

    let registry = PortRegistry::new(loader.into_config());

    match args.command {
        Command::List => list_ports(&registry),
        Command::Send {
            port,
            baud,
            terminator,
            timeout_ms,
            max_len,
            command,
        } => {
            let terminator = unescape(&terminator)?;
            let device = registry.acquire(&port);

            let mut settings: DeviceSettings = device.settings();
            if let Some(baud) = baud {
                device.set_port_configuration(settings.port.clone().with_baud_rate(baud))?;
                settings = device.settings();
            }
            if let Some(timeout_ms) = timeout_ms {
                device.set_answer_timeout(Duration::from_millis(timeout_ms));
            }
            tracing::info!(port = %settings.port.device, line = %settings.port, "Sending command");

            let exchange = device
                .initialize()
                .and_then(|()| device.set_command(&command, &terminator))
                .and_then(|()| device.get_answer(max_len, &terminator));
            let released = registry.release(&device);

            println!("{}", exchange?);
            released?;
            Ok(())
        }
    }
}

fn list_ports(registry: &PortRegistry) -> AppResult<()> {
    let ports = registry.port_lister().list()?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{:<24} {}", port.name, port.description);
    }
    Ok(())
}

/// Expand the escapes a shell makes awkward to type.
fn unescape(text: &str) -> AppResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                return Err(AppError::InvalidArgument(format!(
                    "unknown escape \\{other} in terminator"
                )))
            }
            None => {
                return Err(AppError::InvalidArgument(
                    "terminator ends with a lone backslash".to_string(),
                ))
            }
        }
    }
    Ok(out)
}
