// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Prompt template combining retrieved context with the user question

use crate::rag::errors::RagError;
use std::path::Path;

pub const CONTEXT_SLOT: &str = "{context}";
pub const QUESTION_SLOT: &str = "{question}";

/// Built-in template: answer from the context only, admit when the answer
/// is not there
pub const DEFAULT_TEMPLATE: &str = "Use the following pieces of information to answer the user's question.
If you don't know the answer, just say that you don't know, don't try to make up an answer.

Context: {context}
Question: {question}

Only return the helpful answer below and nothing else.
Helpful answer:
";

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Template text must contain both `{context}` and `{question}`
    pub fn new(template: impl Into<String>) -> Result<Self, RagError> {
        let template = template.into();
        for slot in [CONTEXT_SLOT, QUESTION_SLOT] {
            if !template.contains(slot) {
                return Err(RagError::Config(format!(
                    "Prompt template is missing the {} slot",
                    slot
                )));
            }
        }
        Ok(Self { template })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RagError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!(
                "Cannot read prompt template {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::new(text)
    }

    /// Fill both slots
    ///
    /// Substitution is single pass, so braces inside the context or the
    /// question are never expanded.
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + context.len() + question.len());
        let mut rest = self.template.as_str();

        while let Some(pos) = rest.find('{') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix(CONTEXT_SLOT) {
                out.push_str(context);
                rest = after;
            } else if let Some(after) = tail.strip_prefix(QUESTION_SLOT) {
                out.push_str(question);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}
