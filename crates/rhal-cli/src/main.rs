mod verify;

use clap::{Parser, Subcommand};
use rhal_core::config::{default_config_path, RhalConfig};
use rhal_device::{GraphicsDevice, SoftwareProfile};
use rhal_types::{BackendKind, PixelFormat};
use tracing::info;

#[derive(Parser)]
#[command(name = "rhal")]
#[command(about = "RHAL - portable GPU resource layer over pluggable drivers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the self-check scenarios against every software driver profile
    Verify {
        /// Configuration file path (defaults to the platform location)
        #[arg(short, long)]
        config: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what a driver profile supports for a pixel format
    Caps {
        /// Driver profile (immediate, tiled, explicit)
        #[arg(short, long, default_value = "immediate")]
        backend: BackendKind,

        /// Pixel format (e.g. rgba8, bc3, d24unorms8uint)
        #[arg(short, long, default_value = "rgba8")]
        format: PixelFormat,

        /// Configuration file path (defaults to the platform location)
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    rhal_common::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Verify { config, json } => {
            let path = config.unwrap_or_else(default_config_path);
            verify::run_verify(&path, json)?;
        }

        Commands::Caps {
            backend,
            format,
            config,
        } => {
            let path = config.unwrap_or_else(default_config_path);
            let mut rhal_config = RhalConfig::load_or_default(&path);
            rhal_config.device.backend = backend;
            info!("querying {} profile for {:?}", backend.name(), format);

            let profile = SoftwareProfile::from_config(backend, &rhal_config.software);
            let device = GraphicsDevice::from_config(&rhal_config)
                .map_err(|e| anyhow::anyhow!("bringing up {} driver: {}", backend.name(), e))?;
            let caps = device.capabilities();
            let yes_no = |b: bool| if b { "yes" } else { "no" };

            println!("RHAL capabilities");
            println!();
            println!(
                "  Platform:          {} ({}-bit)",
                rhal_common::platform_name(),
                rhal_common::platform::pointer_width()
            );
            println!("  Backend:           {}", backend.name());
            println!("  Async completion:  {}", yes_no(caps.async_completion));
            println!("  Direct tex update: {}", yes_no(caps.direct_texture_updates));
            println!("  Persistent maps:   {}", yes_no(caps.persistent_buffer_mapping));
            println!("  Debug labels:      {}", yes_no(caps.debug_labels));
            println!("  Row alignment:     {} bytes", profile.row_alignment);
            println!();
            println!("  Format:            {:?}", format);
            let block = format.block_dim();
            println!(
                "    Block:           {}x{} texel(s), {} bytes",
                block,
                block,
                format.bytes_per_block()
            );
            println!("    Compressed:      {}", yes_no(format.is_compressed()));
            println!(
                "    Color samples:   {}",
                device.sample_count_limit(format, false).as_u32()
            );
            println!(
                "    Depth samples:   {}",
                device.sample_count_limit(format, true).as_u32()
            );
        }
    }

    Ok(())
}
