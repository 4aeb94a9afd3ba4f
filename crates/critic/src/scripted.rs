//! Backend replaying canned responses, for tests and demos.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use refine_core::ImageData;

use crate::error::CritiqueError;
use crate::CritiqueBackend;

/// One canned reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
}

/// Replays replies in order. Once the script runs out every call fails.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<ScriptedReply>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Script consisting only of successful texts.
    pub fn from_texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| ScriptedReply::Text(t.into())))
    }

    /// Instructions received so far.
    pub fn instructions(&self) -> Vec<String> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl CritiqueBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, instruction: &str, _image: &ImageData) -> Result<String, CritiqueError> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(instruction.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(CritiqueError::Backend(message)),
            None => Err(CritiqueError::Backend("script exhausted".to_string())),
        }
    }
}
