pub use cbi_cardano as cardano;
pub use cbi_core as core;
pub use cbi_postgres as postgres;
