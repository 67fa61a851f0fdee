use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ecs_stack::engine::{self, AwsCli, Provisioner};
use ecs_stack::render::{Format, render_template};
use ecs_stack::spec::{ContextOverride, load_stack_spec};
use ecs_stack::{ComputeStack, Declared, Result};

#[derive(Parser)]
#[command(name = "ecs-stack", version)]
#[command(
    about = "Declare and deploy a load-balanced Fargate service with secret-backed configuration",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Args)]
struct StackArgs {
    /// Stack config file (JSON, or YAML by .yaml/.yml extension).
    #[arg(long, env = "ECS_STACK_CONFIG")]
    config: PathBuf,

    /// Context override, e.g. `-c containerPort=4000`. Repeatable.
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    context: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the config and emit the template.
    Synth {
        #[command(flatten)]
        stack: StackArgs,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Write to this file instead of stdout.
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
    },

    /// Synthesize and deploy through the AWS CLI, then print the load balancer address.
    Deploy {
        #[command(flatten)]
        stack: StackArgs,

        #[arg(long, env = "AWS_REGION")]
        region: Option<String>,

        #[arg(long, env = "AWS_PROFILE")]
        profile: Option<String>,
    },

    /// Delete a deployed stack.
    Destroy {
        #[arg(long)]
        stack_name: String,

        #[arg(long, env = "AWS_REGION")]
        region: Option<String>,

        #[arg(long, env = "AWS_PROFILE")]
        profile: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_env("ECS_STACK_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Synth { stack, format, out } => {
            let (_, declared) = declare(&stack)?;
            let text = render_template(&declared.template, format)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    eprintln!("Wrote {}", path.display());
                }
                None => print!("{}", text),
            }
        }
        Commands::Deploy {
            stack,
            region,
            profile,
        } => {
            let (stack_name, declared) = declare(&stack)?;
            let engine = AwsCli::new(region, profile);
            let address = engine::deploy(&engine, &stack_name, &declared)?;
            println!("{}", address);
        }
        Commands::Destroy {
            stack_name,
            region,
            profile,
        } => {
            AwsCli::new(region, profile).destroy(&stack_name)?;
            eprintln!("Deleted {}", stack_name);
        }
    }

    Ok(())
}

/// Load config, apply overrides, validate, and declare the stack.
fn declare(args: &StackArgs) -> Result<(String, Declared)> {
    // 1) Parse overrides.
    let overrides = args
        .context
        .iter()
        .map(|raw| ContextOverride::parse(raw))
        .collect::<Result<Vec<_>>>()?;

    // 2) Load + validate config.
    let spec = load_stack_spec(&args.config, &overrides)?;
    let props = spec.validate_and_build()?;

    // 3) Declare.
    let declared = ComputeStack::from_props(&props)?;
    Ok((props.stack_name, declared))
}
