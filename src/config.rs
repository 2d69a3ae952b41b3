//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__ACK__ENABLED=false`）。
//! 各工具族的供应商回退顺序也在这里声明（[providers.families.*]），不再散落在代码里。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub providers: ProvidersSection,
    pub ack: AckSection,
    pub context: ContextSection,
    pub scheduler: SchedulerSection,
    pub store: StoreSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 数据目录（SQLite 等），未设置时用 ./workspace
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: PathBuf::from("workspace"),
        }
    }
}

/// [llm] 段：单步推理（未指定工具的步骤）所用后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
        }
    }
}

/// [tools] 段：工具调用与单个供应商尝试的超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），对工具族而言覆盖整条回退链；生成类工具较慢，默认放宽
    pub tool_timeout_secs: u64,
    /// 回退链中单个供应商一次尝试的超时（秒），应明显小于 tool_timeout_secs
    pub provider_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 180,
            provider_timeout_secs: 50,
        }
    }
}

/// [providers] 段：工具族与 HTTP 端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersSection {
    /// 族名 -> 族配置（如 image -> create_image + [gemini, openai, grok]）
    pub families: HashMap<String, FamilySection>,
    /// 族名 -> 供应商 -> HTTP 端点，如 [providers.endpoints.image] openai = "http://localhost:8001/image"
    pub endpoints: HashMap<String, HashMap<String, String>>,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            families: default_families(),
            endpoints: HashMap::new(),
        }
    }
}

/// [providers.families.<name>] 段
#[derive(Debug, Clone, Deserialize)]
pub struct FamilySection {
    /// 该族对外暴露的工具名
    pub tool: String,
    /// 规范回退顺序
    pub providers: Vec<String>,
    /// 是否为内容创作族（重试时 provider 覆盖只作用于这些族）
    #[serde(default)]
    pub creation: bool,
    /// 承载主要输入的参数名（生成类为 prompt，语音为 text）
    #[serde(default = "default_prompt_key")]
    pub prompt_key: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_prompt_key() -> String {
    "prompt".to_string()
}

fn family(tool: &str, providers: &[&str], creation: bool, description: &str) -> FamilySection {
    FamilySection {
        tool: tool.to_string(),
        providers: providers.iter().map(|p| p.to_string()).collect(),
        creation,
        prompt_key: default_prompt_key(),
        description: Some(description.to_string()),
    }
}

fn default_families() -> HashMap<String, FamilySection> {
    HashMap::from([
        (
            "image".to_string(),
            family("create_image", &["gemini", "openai", "grok"], true, "Generate an image from a prompt"),
        ),
        (
            "video".to_string(),
            family("create_video", &["veo3", "sora", "kling"], true, "Generate a short video from a prompt"),
        ),
        (
            "edit".to_string(),
            family("edit_image", &["gemini", "openai"], true, "Edit an existing image according to a prompt"),
        ),
        (
            "music".to_string(),
            family("create_music", &["suno"], false, "Compose a song from a prompt"),
        ),
        (
            "speech".to_string(),
            FamilySection {
                prompt_key: "text".to_string(),
                ..family("text_to_speech", &["elevenlabs"], false, "Convert text to spoken audio")
            },
        ),
    ])
}

/// [ack] 段：执行前预告
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AckSection {
    pub enabled: bool,
    /// 预告中引用原始请求的最大字符数
    pub quote_chars: usize,
    /// 始终不发预告的工具
    pub skip_tools: Vec<String>,
}

impl Default for AckSection {
    fn default() -> Self {
        Self {
            enabled: true,
            quote_chars: 80,
            skip_tools: Vec::new(),
        }
    }
}

/// [context] 段：跨步骤上下文摘要
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// 每个前序步骤文本摘录的最大字符数
    pub excerpt_chars: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self { excerpt_chars: 160 }
    }
}

/// [scheduler] 段：定时消息工具的去重窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub dedup_window_secs: u64,
    /// 缓存条目超过此数量时顺带清理过期项
    pub gc_threshold: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            dedup_window_secs: 10,
            gc_threshold: 200,
        }
    }
}

/// [store] 段：最近命令的持久化后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// sqlite / memory
    pub backend: String,
    /// SQLite 文件路径；未设置时为 <data_dir>/last_commands.sqlite
    pub path: Option<PathBuf>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: None,
        }
    }
}

impl AppConfig {
    /// 按工具名查找所属族（族名, 族配置）
    pub fn family_of_tool(&self, tool: &str) -> Option<(&str, &FamilySection)> {
        self.providers
            .families
            .iter()
            .find(|(_, f)| f.tool == tool)
            .map(|(name, f)| (name.as_str(), f))
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("last_commands.sqlite"))
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
