//! pagerun harness
//!
//! Runs a test suite inside browser execution contexts and reduces what the
//! contexts report to one result:
//! - Materializes bootstrap resources and a test registry in the output dir
//! - Builds the bundle (webpack through `npx`)
//! - Serves the output dir on a loopback port
//! - Launches page, worker and service-worker contexts through a Playwright
//!   driver process and drains their result events under a deadline
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Orchestrator (Rust)                      │
//! │    ├── resolve_test_files() -> [PathBuf]                    │
//! │    ├── prepare_output_dir() -> Bootstrap                    │
//! │    ├── BundleBuilder::build() -> BuildOutput                │
//! │    ├── AssetServer::start() -> base url                     │
//! │    └── for mode in [page, worker, serviceworker]:           │
//! │          ContextLauncher::launch() -> ExecutionContext      │
//! │          channel::drain() -> Terminal   (until deadline)    │
//! │          ContextLauncher::teardown()                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserLauncher                                            │
//! │    node driver.js  <── stdin:  launch / close / shutdown    │
//! │                    ──> stdout: ready, lifecycle, event, ... │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Browser context                                            │
//! │    index.html ─ page-run.js ─┬─ <script bundle.js>   page   │
//! │                              ├─ new Worker(bundle.js)       │
//! │                              └─ register(bundle.js)   sw    │
//! │    bundle.js: bridge + adapter + test registry              │
//! │      └── __pagerun_report(ResultEvent JSON)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bootstrap;
pub mod bundle;
pub mod channel;
pub mod launcher;
pub mod orchestrator;
pub mod protocol;
pub mod results;
pub mod server;
pub mod suite;

pub use bundle::{BuildOutput, BuildPlan, BundleBuilder, WebpackBuilder};
pub use launcher::{BrowserLauncher, ContextLauncher, ExecutionContext, LauncherConfig};
pub use orchestrator::Orchestrator;
pub use protocol::{DriverCommand, DriverMessage};
pub use server::AssetServer;
