// src/analyze/mod.rs
//! Classification of post text: the model seam and the concurrent batch classifier.

pub mod ai_adapter;
pub mod classifier;

pub use ai_adapter::{build_model_client, DynModelClient, FixedReplyModel, ModelClient, OpenAiProvider};
pub use classifier::{Classifier, Outcome, IRRELEVANT_SENTINEL};
