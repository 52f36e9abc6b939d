//! 对话模板：把 role/content 记录序列渲染为送入编码器的提示串。
//!
//! 模板是无状态的纯字符串变换，形状固定：system 块开头，user 块带
//! 尾随的 assistant 起始标记，assistant 块只补结束标记。标记字面量
//! 与缺省 system 文本都可配置，以覆盖不同模型的约定。更一般的条件
//! 模板文法（工具调用块等）不在覆盖范围内。

use crate::Error;

/// 一条对话记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// 模板配置：各块的起止标记字面量与缺省 system 文本。
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    pub system_open: String,
    pub system_close: String,
    pub user_open: String,
    pub user_close: String,
    pub assistant_open: String,
    pub assistant_close: String,
    pub default_system: String,
}

impl Default for ChatTemplate {
    /// 角色标记写入块起始的约定：`<s>role\n...</s>\n`。
    fn default() -> Self {
        Self {
            system_open: "<s>system\n".into(),
            system_close: "</s>\n".into(),
            user_open: "<s>user\n".into(),
            user_close: "</s>\n".into(),
            assistant_open: "<s>assistant\n".into(),
            assistant_close: "</s>\n".into(),
            default_system: "你是一个乐于助人的人工智能助手。".into(),
        }
    }
}

impl ChatTemplate {
    /// 最小约定：只用裸的起止标记，不标注角色。
    pub fn minimal() -> Self {
        Self {
            system_open: "<s>".into(),
            system_close: "</s>".into(),
            user_open: "<s>".into(),
            user_close: "</s>".into(),
            assistant_open: "<s>".into(),
            assistant_close: "</s>".into(),
            default_system: String::new(),
        }
    }

    /// 渲染对话。
    ///
    /// `messages[0]` 的角色是 "system" 时以其内容作 system 块，否则用
    /// 缺省文本。user 块自带 assistant 起始标记，因此收尾的生成提示
    /// 只在串尾没有悬置的 assistant 起始标记时补上。
    pub fn render(
        &self,
        messages: &[ChatMessage],
        add_generation_prompt: bool,
    ) -> Result<String, Error> {
        let (system, rest) = match messages.split_first() {
            Some((first, rest)) if first.role == "system" => (first.content.as_str(), rest),
            _ => (self.default_system.as_str(), messages),
        };

        let mut out = String::new();
        out.push_str(&self.system_open);
        out.push_str(system);
        out.push_str(&self.system_close);

        let mut open_assistant = false;
        for message in rest {
            match message.role.as_str() {
                "user" => {
                    out.push_str(&self.user_open);
                    out.push_str(&message.content);
                    out.push_str(&self.user_close);
                    out.push_str(&self.assistant_open);
                    open_assistant = true;
                }
                "assistant" => {
                    out.push_str(&message.content);
                    out.push_str(&self.assistant_close);
                    open_assistant = false;
                }
                other => {
                    return Err(Error::Config(format!("unsupported chat role {other:?}")))
                }
            }
        }

        if add_generation_prompt && !open_assistant {
            out.push_str(&self.assistant_open);
        }
        Ok(out)
    }
}
