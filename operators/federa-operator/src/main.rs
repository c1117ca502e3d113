//! federa-operator 命令行入口

use anyhow::Result;
use clap::{Parser, Subcommand};
use federa_operator::{crd, FederaOperator};
use federa_supervisor::config::SupervisorConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Federa 身份联邦控制平面
#[derive(Parser)]
#[command(name = "federa-operator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行控制器与 TLS 监听器
    Run {
        /// 配置文件路径（YAML 或 JSON）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 输出全部 CRD 的 YAML
    Crds,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crds => {
            print!("{}", crd::crds_yaml()?);
            Ok(())
        }
        Commands::Run { config } => {
            let config = SupervisorConfig::load(config.as_deref())?;
            init_tracing(&config.log_level);

            let operator = FederaOperator::new(config).await?;
            operator.run().await
        }
    }
}
