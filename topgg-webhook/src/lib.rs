pub mod dispatcher;
pub mod server;

pub use dispatcher::{
    parse_vote_event, DispatchOutcome, ErrorHook, VoteEventDispatcher, VoteHandler, WebhookRoute,
};
pub use server::WebhookServer;
