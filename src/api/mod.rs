// =============================================================================
// API Module
// =============================================================================
//
// `rest` is the one surface wired into `main.rs` (per §6's REST-only
// interface). The teacher's `ws.rs` WebSocket push feed has no counterpart
// here and references the now-superseded `app_state::AppState`; it stays
// on disk unreferenced as teacher material until the final trim pass
// deletes it, so it is deliberately not declared as a module below.

pub mod auth;
pub mod rest;
