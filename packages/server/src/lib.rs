// Patchbay - network-automation command broker
//
// Clients submit commands targeting network devices; the broker resolves the
// device from a pluggable inventory, fetches credentials from a pluggable
// credential store, opens an SSH session through a device driver, serialises
// access per device, caches results, and returns structured output.
//
// Layout follows the usual split: `server` is the HTTP dispatcher, `kernel`
// holds the store-backed machinery (queue, semaphore, cache, worker), and
// `common` holds the shared data model.

pub mod common;
pub mod config;
pub mod kernel;
pub mod parsing;
pub mod server;

pub use config::Settings;
