//! The option bag (§4.2): a single opaque value assembled by composing
//! functional options, grounded in the builder style the toolkit types use
//! elsewhere in this crate.
//!
//! Each [`Opt`] either sets a typed slot, appends to one, or — when built
//! from an out-of-range value — carries a deferred error. [`OptionBag::apply`]
//! folds the option list left-to-right and returns the first deferred error
//! it meets, mirroring the "factory returns an error-option" validation
//! policy.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;
use crate::schema::Role;
use crate::toolkit::Toolkit;

/// Tool-selection mode (`tool_choice`).
#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    Auto,
    Any,
    None,
    Tool(String),
}

/// Sink for streamed output: invoked once per visible token or thinking
/// delta, with the role it belongs to.
pub type StreamFn = Arc<dyn Fn(Role, &str) + Send + Sync>;

/// Embedding task hint (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTaskType {
    RetrievalQuery,
    RetrievalDocument,
    Semantic,
    Classification,
    Clustering,
    QuestionAnswering,
    FactVerification,
    CodeRetrieval,
}

/// The assembled, validated option set passed to a generator or embedder.
///
/// Unknown provider-specific options are tolerated and carried in `extra`
/// rather than rejected, so a shared bag can serve several providers at
/// once.
#[derive(Default, Clone)]
pub struct OptionBag {
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub max_tokens: Option<u64>,
    pub stop_sequences: Vec<String>,
    pub seed: Option<i64>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub json_schema: Option<Value>,
    pub thinking: Option<bool>,
    pub thinking_budget: Option<u64>,
    pub tool_choice: Option<ToolChoice>,
    pub toolkit: Option<Arc<Toolkit>>,
    pub stream: Option<StreamFn>,
    pub user_id: Option<String>,
    pub service_tier: Option<String>,
    pub cache_control: Option<String>,
    pub task_type: Option<EmbeddingTaskType>,
    pub title: Option<String>,
    pub output_dimensionality: Option<u64>,
    pub extra: HashMap<String, Value>,
}

impl std::fmt::Debug for OptionBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionBag")
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("top_k", &self.top_k)
            .field("max_tokens", &self.max_tokens)
            .field("stop_sequences", &self.stop_sequences)
            .field("seed", &self.seed)
            .field("tool_choice", &self.tool_choice)
            .field("stream", &self.stream.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}

/// A single functional option. Built by the `opt::*` factories below; a
/// factory that receives an out-of-range value returns an `Opt` that carries
/// the error instead of mutating the bag.
pub struct Opt(Box<dyn FnOnce(&mut OptionBag) -> Result<(), Error> + Send>);

impl Opt {
    fn ok(f: impl FnOnce(&mut OptionBag) + Send + 'static) -> Self {
        Opt(Box::new(move |bag| {
            f(bag);
            Ok(())
        }))
    }

    fn err(e: Error) -> Self {
        Opt(Box::new(move |_| Err(e)))
    }
}

impl OptionBag {
    /// Fold `opts` left-to-right into a fresh bag. The first deferred error
    /// short-circuits and is returned; options after it never run.
    pub fn apply(opts: Vec<Opt>) -> Result<Self, Error> {
        let mut bag = OptionBag::default();
        for opt in opts {
            (opt.0)(&mut bag)?;
        }
        Ok(bag)
    }
}

/// Option factories, one per recognized key in §4.2's table.
pub mod opt {
    use super::*;

    pub fn system_prompt(text: impl Into<String>) -> Opt {
        let text = text.into();
        Opt::ok(move |b| b.system_prompt = Some(text))
    }

    pub fn temperature(t: f64) -> Opt {
        if !(0.0..=2.0).contains(&t) {
            return Opt::err(Error::BadParameter(format!(
                "temperature {t} out of range [0, 2]"
            )));
        }
        Opt::ok(move |b| b.temperature = Some(t))
    }

    pub fn top_p(p: f64) -> Opt {
        if !(0.0..=1.0).contains(&p) {
            return Opt::err(Error::BadParameter(format!("top_p {p} out of range [0, 1]")));
        }
        Opt::ok(move |b| b.top_p = Some(p))
    }

    pub fn top_k(k: u64) -> Opt {
        if k < 1 {
            return Opt::err(Error::BadParameter("top_k must be >= 1".into()));
        }
        Opt::ok(move |b| b.top_k = Some(k))
    }

    pub fn max_tokens(n: u64) -> Opt {
        if n < 1 {
            return Opt::err(Error::BadParameter("max_tokens must be >= 1".into()));
        }
        Opt::ok(move |b| b.max_tokens = Some(n))
    }

    /// Appends to the stop-sequence list; at least one non-empty string is
    /// required.
    pub fn stop_sequences(seqs: Vec<String>) -> Opt {
        if seqs.is_empty() || seqs.iter().any(|s| s.is_empty()) {
            return Opt::err(Error::BadParameter(
                "stop_sequences requires >=1 non-empty string".into(),
            ));
        }
        Opt::ok(move |b| b.stop_sequences.extend(seqs))
    }

    pub fn seed(s: i64) -> Opt {
        Opt::ok(move |b| b.seed = Some(s))
    }

    pub fn presence_penalty(p: f64) -> Opt {
        if !(-2.0..=2.0).contains(&p) {
            return Opt::err(Error::BadParameter(format!(
                "presence_penalty {p} out of range [-2, 2]"
            )));
        }
        Opt::ok(move |b| b.presence_penalty = Some(p))
    }

    pub fn frequency_penalty(p: f64) -> Opt {
        if !(-2.0..=2.0).contains(&p) {
            return Opt::err(Error::BadParameter(format!(
                "frequency_penalty {p} out of range [-2, 2]"
            )));
        }
        Opt::ok(move |b| b.frequency_penalty = Some(p))
    }

    pub fn json_schema(schema: Value) -> Opt {
        Opt::ok(move |b| b.json_schema = Some(schema))
    }

    pub fn thinking(enabled: bool) -> Opt {
        Opt::ok(move |b| b.thinking = Some(enabled))
    }

    pub fn thinking_budget(tokens: u64) -> Opt {
        if tokens < 1024 {
            return Opt::err(Error::BadParameter(
                "thinking_budget must be >= 1024".into(),
            ));
        }
        Opt::ok(move |b| {
            b.thinking = Some(true);
            b.thinking_budget = Some(tokens);
        })
    }

    pub fn tool_choice(choice: ToolChoice) -> Opt {
        Opt::ok(move |b| b.tool_choice = Some(choice))
    }

    pub fn toolkit(tk: Arc<Toolkit>) -> Opt {
        Opt::ok(move |b| b.toolkit = Some(tk))
    }

    pub fn stream(f: impl Fn(Role, &str) + Send + Sync + 'static) -> Opt {
        let f: StreamFn = Arc::new(f);
        Opt::ok(move |b| b.stream = Some(f))
    }

    pub fn user_id(id: impl Into<String>) -> Opt {
        let id = id.into();
        Opt::ok(move |b| b.user_id = Some(id))
    }

    pub fn service_tier(tier: impl Into<String>) -> Opt {
        let tier = tier.into();
        Opt::ok(move |b| b.service_tier = Some(tier))
    }

    pub fn cache_control(cc: impl Into<String>) -> Opt {
        let cc = cc.into();
        Opt::ok(move |b| b.cache_control = Some(cc))
    }

    pub fn task_type(t: EmbeddingTaskType) -> Opt {
        Opt::ok(move |b| b.task_type = Some(t))
    }

    pub fn title(t: impl Into<String>) -> Opt {
        let t = t.into();
        Opt::ok(move |b| b.title = Some(t))
    }

    pub fn output_dimensionality(n: u64) -> Opt {
        if n < 1 {
            return Opt::err(Error::BadParameter(
                "output_dimensionality must be >= 1".into(),
            ));
        }
        Opt::ok(move |b| b.output_dimensionality = Some(n))
    }

    /// Escape hatch for provider-specific keys the common bag doesn't model.
    pub fn extra(key: impl Into<String>, value: Value) -> Opt {
        let key = key.into();
        Opt::ok(move |b| {
            b.extra.insert(key, value);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::opt::*;
    use super::*;

    #[test]
    fn applies_options_left_to_right() {
        let bag = OptionBag::apply(vec![
            temperature(0.5),
            max_tokens(100),
            stop_sequences(vec!["END".into()]),
        ])
        .unwrap();
        assert_eq!(bag.temperature, Some(0.5));
        assert_eq!(bag.max_tokens, Some(100));
        assert_eq!(bag.stop_sequences, vec!["END".to_string()]);
    }

    #[test]
    fn first_error_short_circuits() {
        let err = OptionBag::apply(vec![max_tokens(10), temperature(9.0), max_tokens(20)])
            .unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn out_of_range_top_p_rejected() {
        assert!(OptionBag::apply(vec![top_p(1.5)]).is_err());
    }

    #[test]
    fn thinking_budget_below_floor_rejected() {
        assert!(OptionBag::apply(vec![thinking_budget(100)]).is_err());
    }

    #[test]
    fn unknown_keys_survive_in_extra() {
        let bag = OptionBag::apply(vec![extra("vendor_flag", Value::Bool(true))]).unwrap();
        assert_eq!(bag.extra.get("vendor_flag"), Some(&Value::Bool(true)));
    }
}
