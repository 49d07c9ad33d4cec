use crate::error::MultiChatError;
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 主配置结构
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 模型配置的存储文件
    pub models_file: PathBuf,
    /// 单次模型调用的超时预算
    pub request_timeout_secs: u64,
    pub generation: GenerationParams,
}

/// 每次调用固定的生成参数
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models_file: PathBuf::from("data/modelConfig.json"),
            request_timeout_secs: 60,
            generation: GenerationParams::default(),
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 800,
        }
    }
}

impl Config {
    /// 从 YAML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// 加载配置；文件不存在时使用默认值
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("配置文件 {} 不存在，使用默认配置", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let content = Self::replace_env_vars(content)?;
        // 空文件等价于全部默认值
        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// 替换配置中的环境变量 ${VAR}
    fn replace_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .map_err(|e| MultiChatError::internal(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name).map_err(|_| {
                MultiChatError::config(format!("环境变量未找到: {}", var_name))
            })?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// 验证配置
    fn validate(&self) -> Result<()> {
        if self.models_file.as_os_str().is_empty() {
            return Err(MultiChatError::config("models_file 不能为空"));
        }
        if self.request_timeout_secs == 0 {
            return Err(MultiChatError::config("request_timeout_secs 必须大于 0"));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(MultiChatError::config(format!(
                "temperature 必须在 0.0 到 2.0 之间，当前值: {}",
                self.generation.temperature
            )));
        }
        if self.generation.max_tokens == 0 {
            return Err(MultiChatError::config("max_tokens 必须大于 0"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
