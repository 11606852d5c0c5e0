pub const NAMESPACE: &str = "fglv1.0";

pub const NODE_CONTROL_REBIRTH: &str = "Node Control/Rebirth";
pub const BDSEQ: &str = "bdseq";

pub const NBIRTH: &str = "NBIRTH";
pub const NDEATH: &str = "NDEATH";
pub const NDATA: &str = "NDATA";
pub const NCMD: &str = "NCMD";

pub const DBIRTH: &str = "DBIRTH";
pub const DDEATH: &str = "DDEATH";
pub const DDATA: &str = "DDATA";
pub const DCMD: &str = "DCMD";

pub const STATE: &str = "STATE";
