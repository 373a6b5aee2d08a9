use serde::{Deserialize, Serialize};

/// One pre/post/invariant contract attached to an IVCU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub kind: ContractKind,
    pub expression: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Pre,
    Post,
    Invariant,
}
