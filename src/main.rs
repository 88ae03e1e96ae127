use clap::{Arg, ArgAction, Command};
use pagecraft::config::{Config, CredentialStore};
use pagecraft::pipeline::{build_generator, compile_file, Pipeline};
use pagecraft::preview_server::{self, DEFAULT_BIND};
use pagecraft::providers::ConsoleNotifier;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("pagecraft")
        .about("Describe a React component, get a live preview")
        .long_about(
            "pagecraft sends a description to Gemini, extracts the generated React code \
             and compiles it into a self-contained HTML preview",
        )
        .arg(
            Arg::new("set-api-key")
                .long("set-api-key")
                .help("Save the Gemini API key to the config file")
                .value_name("API_KEY")
                .num_args(1),
        )
        .arg(
            Arg::new("api-key")
                .long("api-key")
                .help("Gemini API key for this run (overrides GEMINI_API_KEY)")
                .value_name("API_KEY")
                .num_args(1)
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Show configuration information")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("generate")
                .about("Generate a component and write component.jsx and preview.html")
                .arg(
                    Arg::new("prompt")
                        .help("Description of the component")
                        .required(true)
                        .num_args(1..),
                )
                .arg(model_arg())
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .help("Output directory")
                        .value_name("DIR")
                        .default_value("."),
                ),
        )
        .subcommand(
            Command::new("compile")
                .about("Compile an existing component file into a preview page")
                .arg(Arg::new("file").help("Component source file").required(true))
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .help("Output HTML file (defaults to FILE with .html)")
                        .value_name("FILE"),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the browser front end")
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .help("Address to listen on")
                        .value_name("ADDR")
                        .default_value(DEFAULT_BIND),
                )
                .arg(model_arg()),
        )
}

fn model_arg() -> Arg {
    Arg::new("model")
        .long("model")
        .help("Gemini model to use")
        .value_name("MODEL")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();

    if let Some(api_key) = matches.get_one::<String>("set-api-key") {
        let credentials = CredentialStore::from_env(None)?;
        if credentials.set(api_key) {
            println!("✅ API key saved successfully");
        } else {
            anyhow::bail!("Could not save the API key to {}", Config::get_config_path()?.display());
        }
        return Ok(());
    }

    if matches.get_flag("config") {
        Config::show_config_info()?;
        return Ok(());
    }

    let config = Config::load()?;
    let explicit_key = matches.get_one::<String>("api-key").cloned();
    let credentials = Arc::new(CredentialStore::from_env(explicit_key)?);

    match matches.subcommand() {
        Some(("generate", sub)) => {
            let prompt = sub
                .get_many::<String>("prompt")
                .unwrap_or_default()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ");
            let model = sub
                .get_one::<String>("model")
                .map(String::as_str)
                .unwrap_or(config.model());
            let out_dir = sub
                .get_one::<String>("out")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));

            info!("Generating component for: {}", prompt);
            let generator = build_generator(&config, credentials, Arc::new(ConsoleNotifier));
            let pipeline = Pipeline::new(generator, model);
            let files = pipeline.generate_to_dir(&prompt, &out_dir).await?;

            println!("📝 Source: {}", files.source_path.display());
            println!("🖼️  Preview: {}", files.preview_path.display());
        }
        Some(("compile", sub)) => {
            let input = sub
                .get_one::<String>("file")
                .map(PathBuf::from)
                .ok_or_else(|| anyhow::anyhow!("No input file provided"))?;
            let output = sub.get_one::<String>("out").map(PathBuf::from);

            let written = compile_file(&input, output.as_deref(), &ConsoleNotifier)?;
            println!("🖼️  Preview: {}", written.display());
        }
        Some(("serve", sub)) => {
            let bind = sub
                .get_one::<String>("bind")
                .map(String::as_str)
                .unwrap_or(DEFAULT_BIND);
            let model = sub
                .get_one::<String>("model")
                .map(String::as_str)
                .unwrap_or(config.model());

            preview_server::serve(&config, credentials, bind, model).await?;
        }
        _ => {
            eprintln!("No command provided. Use 'pagecraft --help' for usage information.");
        }
    }

    Ok(())
}
