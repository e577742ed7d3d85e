//! Chain solver: walks a chain of linked puzzle pages, answering each one and
//! following the next URL the submission endpoint hands back.

pub mod config;
pub mod controller;
pub mod extract;
pub mod fetcher;
pub mod oracle;
pub mod renderer;
pub mod submit;
pub mod types;

pub use config::{ConfigError, ExtractorConfig, OracleConfig, SolverConfig, DEFAULT_QUESTION};
pub use controller::ChainController;
pub use extract::{decode_hidden_payload, encode_hidden_payload, find_submit_url, Extractor};
pub use fetcher::{BrowserFetcher, FetchBackend, HttpFetcher, PageFetcher};
pub use oracle::{
    normalize_answer, Answer, AnswerRequest, OpenAiOracle, Oracle, RetryHint,
    ORACLE_FAILURE_SENTINEL,
};
pub use renderer::{LazyRenderer, RenderContext, Renderer};
pub use submit::{SubmissionClient, SubmissionPayload};
pub use types::*;
