//! Continuous-query counterpart of the batch scheduler: compiles a stream
//! fragment graph into persistent actors and drives materialized-view DDL
//! against the meta service.

pub mod graph;
pub mod stream_manager;

pub use graph::{
    Dispatcher, DispatcherType, MergeNode, StreamActor, StreamFragment, StreamFragmentGraph,
    StreamGraphBuilder, StreamNode, StreamNodeBody,
};
pub use stream_manager::{MetaClient, StreamManager};
