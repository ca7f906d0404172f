// Multi-exchange price fan-in (§4.B).
pub mod price_fanin;

// Per-symbol bounded price history (§4.C).
pub mod ring_buffer;

// Complex alert cache, refreshed periodically and on CRUD (§4.D).
pub mod complex_cache;

// Per-tick complex alert evaluation (§4.E).
pub mod tick_evaluator;

// Periodic safety-net sweep over every tracked symbol (§4.F).
pub mod safety_net_sweeper;

// Sub-second price-alert touch/cross loop (§4.G).
pub mod fast_price_loop;

// Low-frequency historical crossing recovery (§4.H).
pub mod klines_sweep;

// Cross-process single-writer lease (§4.I).
pub mod lease_coordinator;

// Lease-local fire action: persist, publish, notify (§4.J).
pub mod trigger_sink;

// System orchestrator.
pub mod engine;
