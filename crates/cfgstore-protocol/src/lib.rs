mod lifecycle;
mod payload;
mod protocol;

pub use lifecycle::{remove_socket, socket_path, SOCKET_ENV};
pub use payload::{ConfigPayload, ConfigView, PayloadEntry, PayloadError, RevisionView};
pub use protocol::{
    Request, RequestId, Response, RpcError, ALREADY_REGISTERED, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, LOAD_FAILED, METHOD_NOT_FOUND, PARSE_ERROR, UNKNOWN_CONFIG, UNKNOWN_KEY,
};
