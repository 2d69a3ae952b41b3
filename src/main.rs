//! bee-conductor 命令行入口
//!
//! - `run <plan.json>`：执行 Planner 产出的计划
//! - `tool <name> <json>`：直接执行单个工具
//! - `retry`：重放最近一次命令（可筛选步骤、覆盖供应商、追加修改）
//! - `last`：查看最近一次命令
//! - `schema`：输出 Plan 的 JSON Schema（供 Planner prompt 使用）

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bee_conductor::agent::create_agent;
use bee_conductor::channel::ConsoleChannel;
use bee_conductor::config::load_config;
use bee_conductor::orchestrator::{RunOptions, RunOutcome};
use bee_conductor::retry::ReplayRequest;
use bee_conductor::tools::plan_schema_json;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bee-conductor")]
#[command(about = "Tool-call orchestration with provider fallback and replay")]
struct Cli {
    /// 会话 ID（最近命令按会话记录）
    #[arg(long, default_value = "cli")]
    conversation: String,
    /// 额外的配置文件，覆盖 config/default.toml
    #[arg(long)]
    config: Option<PathBuf>,
    /// 被引用的原始消息 ID
    #[arg(long)]
    quote: Option<String>,
    /// 原始请求文本（预告中引用）
    #[arg(long)]
    request: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 执行计划文件
    Run { plan: PathBuf },
    /// 执行单个工具
    Tool {
        name: String,
        #[arg(default_value = "{}")]
        args: String,
    },
    /// 重放最近一次命令
    Retry {
        #[arg(long, value_delimiter = ',')]
        steps: Vec<usize>,
        #[arg(long, value_delimiter = ',')]
        tools: Vec<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long = "mod")]
        modifications: Option<String>,
    },
    /// 查看最近一次命令
    Last,
    /// 输出 Plan 的 JSON Schema
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bee_conductor::observability::init();
    let cli = Cli::parse();

    if let Command::Schema = cli.command {
        println!("{}", plan_schema_json());
        return Ok(());
    }

    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    let agent = create_agent(cfg, Arc::new(ConsoleChannel)).context("Failed to create agent")?;

    let mut opts = RunOptions {
        quoted_message_id: cli.quote.clone(),
        ..Default::default()
    };
    if let Some(req) = &cli.request {
        opts = opts.with_request(req.clone());
    }
    let conv = cli.conversation.as_str();

    match cli.command {
        Command::Run { plan } => {
            let json = std::fs::read_to_string(&plan)
                .with_context(|| format!("Failed to read {}", plan.display()))?;
            let outcome = agent.run_plan_json(conv, &json, &opts).await?;
            println!(
                "\n{}/{} steps succeeded",
                outcome.succeeded, outcome.attempted
            );
        }
        Command::Tool { name, args } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).context("Tool arguments must be JSON")?;
            let outcome = agent.run_tool(conv, &name, args, &opts).await;
            if !outcome.result.success {
                std::process::exit(1);
            }
        }
        Command::Retry {
            steps,
            tools,
            provider,
            modifications,
        } => {
            let request = ReplayRequest {
                modifications,
                provider_override: provider,
                step_numbers: steps,
                step_tools: tools,
            };
            match agent.retry(conv, &request, &opts).await? {
                RunOutcome::Single(s) => {
                    println!("\nretried {}: {}", s.tool, if s.result.success { "ok" } else { "failed" })
                }
                RunOutcome::Multi(m) => {
                    println!("\n{}/{} steps succeeded", m.succeeded, m.attempted)
                }
            }
        }
        Command::Last => match agent.last_command(conv).await? {
            Some(cmd) => println!("{}", serde_json::to_string_pretty(&cmd)?),
            None => println!("(no previous command)"),
        },
        Command::Schema => {}
    }

    Ok(())
}
