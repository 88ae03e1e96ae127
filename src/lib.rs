//! pagecraft - describe a React component, get a live preview.
//!
//! A prompt goes to Gemini, the component source is pulled out of the reply,
//! compiled into a self-contained HTML page and rendered in an isolated
//! frame with console and error capture.
//!
//! # Architecture
//!
//! - [`config`] - Configuration file, environment overrides and the credential store
//! - [`llm_generator`] - Gemini requests and code extraction
//! - [`mount_strategy`] - Finding the component to mount in generated source
//! - [`preview_compiler`] - Source to preview document
//! - [`renderer`] - Render cycles against an isolated context
//! - [`session`] - Current generation and stale result handling
//! - [`pipeline`] - Wiring for the CLI
//! - [`preview_server`] / [`host_page`] - The `serve` front end
//! - [`providers`] - Shared dependency injection traits
//! - [`http_client`] - HTTP client abstraction
//! - [`error`] - Error kinds
//!
//! # Example
//!
//! ```ignore
//! use pagecraft::preview_compiler::compile;
//!
//! let document = compile("function Btn(){return <button>Hi</button>}\nexport default Btn");
//! assert_eq!(document.plan.selected().unwrap().name, "Btn");
//! std::fs::write("preview.html", document.as_str())?;
//! ```

pub mod config;
pub mod error;
pub mod host_page;
pub mod http_client;
pub mod llm_generator;
pub mod mount_strategy;
pub mod pipeline;
pub mod preview_compiler;
pub mod preview_server;
pub mod providers;
pub mod renderer;
pub mod session;
