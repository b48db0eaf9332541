// =============================================================================
// Signals Module
// =============================================================================
//
// `advanced` is the one signal pipeline actually wired into the scheduler —
// see its module doc for why the classical-vs-advanced duplication in the
// Python original collapses to just this path here.

pub mod advanced;
