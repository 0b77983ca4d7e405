use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use muse_agent::IntentRouter;
use muse_core::config::Config;
use muse_core::types::{AgentInput, ExecutionContext};
use muse_gateway::GatewayState;
use muse_gateway::handlers::response_body;
use muse_tools::{ToolRegistry, register_builtin_tools};

mod logging;

#[derive(Parser)]
#[command(
    name = "muse",
    about = "Creative assistant agent: image generation, website content and social posting",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to listen on (default: 8787)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Send one message through the router and the agent
    Chat {
        /// Message to send
        #[arg(short, long)]
        message: String,

        /// User the request is made on behalf of
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Image URLs attached to the message
        #[arg(long = "image")]
        images: Vec<String>,

        /// Print the full JSON response
        #[arg(long)]
        json: bool,
    },

    /// Classify a message without running the agent
    Classify {
        #[arg(short, long)]
        message: String,
    },

    /// List registered tools
    Tools {
        /// Print the prompt description of every tool
        #[arg(long)]
        describe: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a config value by dotted path
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    logging::init(config.logging.as_ref(), cli.verbose)?;
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let state = Arc::new(GatewayState::from_config(Arc::new(config))?);
            tracing::info!("Starting Muse gateway on port {port}");
            muse_gateway::start_gateway(state, port).await?;
        }
        Commands::Chat {
            message,
            user,
            images,
            json,
        } => {
            let state = GatewayState::from_config(Arc::new(config))?;
            let input = AgentInput { message, images };
            let mut context = ExecutionContext::for_user(&user);
            context.reference_images = input.images.clone();

            let decision = state.route(&user, &input.message, &[]).await;
            if let Some(d) = decision.as_ref().filter(|d| d.needs_clarification) {
                println!("{}", d.clarification_question());
                state.flush_telemetry().await;
                return Ok(());
            }
            context.router_intent = decision.as_ref().map(|d| d.intent);

            let result = state.executor_for(&user).run(&input, &mut context).await;
            state.flush_telemetry().await;
            let body = response_body(&result?, decision.as_ref());
            if json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("{}", body["message"].as_str().unwrap_or_default());
                if let Some(url) = body["imageUrl"].as_str() {
                    println!("Image: {url}");
                }
            }
        }
        Commands::Classify { message } => {
            let client = muse_providers::build_client(&config)?;
            let router = IntentRouter::from_config(&config, client);
            let decision = router.classify(&message, &[]).await?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
            if decision.needs_clarification {
                println!("Clarification: {}", decision.clarification_question());
            }
        }
        Commands::Tools { describe } => {
            let mut tools = ToolRegistry::new();
            register_builtin_tools(&mut tools, &config)?;
            if describe {
                println!("{}", tools.describe());
            } else {
                for name in tools.list() {
                    let description = tools.get(name).map(|t| t.description()).unwrap_or("");
                    println!("{name:<18} {description}");
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s)", errors.len());
                }
                println!("Config OK ({} warning(s))", warnings.len());
            }
        },
        Commands::Status => {
            println!("Muse v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Provider: {}", config.provider_id());
            println!(
                "Model: {}",
                config.model().as_deref().unwrap_or("(provider default)")
            );
            println!(
                "Router: {}",
                if config.router_enabled() {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!("Max iterations: {}", config.max_iterations());
            println!("Gateway: {}:{}", config.gateway_bind(), config.gateway_port());
        }
    }

    Ok(())
}
