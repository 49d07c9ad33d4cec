use crate::error::MultiChatError;
use crate::providers::ProviderKind;
use crate::types::{ApiType, ModelConfig};
use crate::Result;
use chrono::Utc;
use serde::Deserialize;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 模型配置的只读来源
pub trait ModelStore: Send + Sync {
    /// 按存储顺序返回所有模型的快照
    fn list_all(&self) -> impl Future<Output = Result<Vec<ModelConfig>>> + Send;
}

/// 选出本次请求的目标模型
///
/// 指定了非空 ID 列表时按 ID 筛选（保持注册表原有顺序，忽略 active），
/// 否则返回所有 active 模型。结果为空时返回 `NoTargetModels`。
pub fn select_targets(
    all_models: &[ModelConfig],
    requested_ids: Option<&[String]>,
) -> Result<Vec<ModelConfig>> {
    let targets: Vec<ModelConfig> = match requested_ids {
        Some(ids) if !ids.is_empty() => all_models
            .iter()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect(),
        _ => all_models.iter().filter(|m| m.active).cloned().collect(),
    };

    if targets.is_empty() {
        return Err(MultiChatError::NoTargetModels);
    }
    Ok(targets)
}

/// 新增模型时提交的字段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_type: Option<ApiType>,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub dialect: Option<ProviderKind>,
}

impl ModelDraft {
    fn into_config(self, id: String) -> Result<ModelConfig> {
        if self.model.trim().is_empty() {
            return Err(MultiChatError::validation("model 不能为空"));
        }

        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name(&self.model));
        let api_type = self.api_type.unwrap_or_default();
        let dialect = resolve_dialect(&api_type, self.dialect, &self.base_url);

        Ok(ModelConfig {
            id,
            name,
            api_type,
            base_url: self.base_url,
            api_key: self.api_key,
            model: self.model,
            active: true,
            color: Some(self.color.unwrap_or_else(random_color)),
            dialect,
        })
    }
}

/// 部分更新，未提供的字段保持不变；ID 不可修改
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelPatch {
    pub name: Option<String>,
    pub api_type: Option<ApiType>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub active: Option<bool>,
    pub color: Option<String>,
    pub dialect: Option<ProviderKind>,
}

impl ModelPatch {
    fn apply(self, target: &mut ModelConfig) {
        let base_url_changed = self
            .base_url
            .as_ref()
            .is_some_and(|url| *url != target.base_url);

        if let Some(name) = self.name {
            target.name = name;
        }
        if let Some(api_type) = self.api_type {
            target.api_type = api_type;
        }
        if let Some(base_url) = self.base_url {
            target.base_url = base_url;
        }
        if let Some(api_key) = self.api_key {
            target.api_key = api_key;
        }
        if let Some(model) = self.model {
            target.model = model;
        }
        if let Some(active) = self.active {
            target.active = active;
        }
        if let Some(color) = self.color {
            target.color = Some(color);
        }

        if self.dialect.is_some() {
            target.dialect = self.dialect;
        } else if base_url_changed {
            // 地址变了，原先推断出的方言可能已经过时
            target.dialect = resolve_dialect(&target.api_type, None, &target.base_url);
        }
    }
}

/// 在配置时确定方言，调用时不再嗅探 base_url
fn resolve_dialect(
    api_type: &ApiType,
    explicit: Option<ProviderKind>,
    base_url: &str,
) -> Option<ProviderKind> {
    match api_type {
        ApiType::OpenAi => Some(explicit.unwrap_or_else(|| ProviderKind::infer(base_url))),
        ApiType::Other(_) => explicit,
    }
}

/// "meta-llama/Llama-3-8b" -> "Llama-3-8b"
fn default_name(model: &str) -> String {
    // 以 `/` 结尾时最后一段为空，退回完整的 model
    match model.rsplit('/').next() {
        Some(last) if !last.is_empty() => last.to_string(),
        _ => model.to_string(),
    }
}

fn random_color() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    format!("#{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2])
}

fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..5].to_string()
}

/// 以 JSON 文件保存的模型注册表
///
/// 文件不存在视为空注册表；写操作串行执行，先写临时文件再替换。
#[derive(Debug)]
pub struct FileModelStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_models(&self) -> Result<Vec<ModelConfig>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MultiChatError::Registry(format!(
                    "读取 {} 失败: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            MultiChatError::Registry(format!("解析 {} 失败: {}", self.path.display(), e))
        })
    }

    async fn write_models(&self, models: &[ModelConfig]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let content = serde_json::to_string_pretty(models)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        debug!("已保存 {} 个模型配置到 {}", models.len(), self.path.display());
        Ok(())
    }

    /// 新增模型，ID 形如 `model-{毫秒时间戳}`，默认启用
    pub async fn add(&self, draft: ModelDraft) -> Result<ModelConfig> {
        let _guard = self.write_lock.lock().await;
        let mut models = self.read_models().await?;

        let mut id = format!("model-{}", Utc::now().timestamp_millis());
        if models.iter().any(|m| m.id == id) {
            id = format!("{}-{}", id, random_suffix());
        }

        let model = draft.into_config(id)?;
        models.push(model.clone());
        self.write_models(&models).await?;

        info!(model_id = %model.id, "新增模型配置: {}", model.name);
        Ok(model)
    }

    pub async fn update(&self, id: &str, patch: ModelPatch) -> Result<ModelConfig> {
        let _guard = self.write_lock.lock().await;
        let mut models = self.read_models().await?;

        let target = models
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| MultiChatError::ModelNotFound(id.to_string()))?;
        patch.apply(target);
        let updated = target.clone();

        self.write_models(&models).await?;
        info!(model_id = %id, "更新模型配置");
        Ok(updated)
    }

    /// 删除模型；不存在时也视为成功，返回是否真的删除了
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut models = self.read_models().await?;

        let before = models.len();
        models.retain(|m| m.id != id);
        let removed = models.len() != before;

        if removed {
            self.write_models(&models).await?;
            info!(model_id = %id, "删除模型配置");
        }
        Ok(removed)
    }

    /// 批量导入，全部校验通过后一次性写入
    pub async fn import_batch(&self, drafts: Vec<ModelDraft>) -> Result<Vec<ModelConfig>> {
        let _guard = self.write_lock.lock().await;
        let mut models = self.read_models().await?;

        let timestamp = Utc::now().timestamp_millis();
        let imported = drafts
            .into_iter()
            .map(|draft| draft.into_config(format!("model-{}-{}", timestamp, random_suffix())))
            .collect::<Result<Vec<_>>>()?;

        models.extend(imported.iter().cloned());
        self.write_models(&models).await?;

        info!("批量导入 {} 个模型配置", imported.len());
        Ok(imported)
    }
}

impl ModelStore for FileModelStore {
    async fn list_all(&self) -> Result<Vec<ModelConfig>> {
        self.read_models().await
    }
}
