use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{node::NodeId, topology::ClusterId};

/// Errors raised while loading a [Topology](crate::topology::Topology).
/// All of them are fatal: no node is started when the topology cannot be loaded.
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("unable to read topology file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed topology document: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no cluster is marked with isSelf")]
    NoSelfCluster,
    #[error("clusters {0} and {1} are both marked with isSelf")]
    MultipleSelfClusters(ClusterId, ClusterId),
    #[error("cluster {cluster} gets no port: {base_port} + {cluster} exceeds 65535")]
    PortOutOfRange { cluster: u32, base_port: u16 },
    #[error("node {node} is declared by both {first} and {second}")]
    DuplicateNode {
        node: NodeId,
        first: ClusterId,
        second: ClusterId,
    },
}

/// A payload that could not be turned back into a [Message](crate::message::Message).
#[derive(Error, Debug)]
#[error("malformed message: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,
    #[error("empty frame")]
    Empty,
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    TooLarge(usize),
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("node {0} does not exist in the topology")]
    UnknownNode(NodeId),
    #[error("node {0} is not owned by this cluster")]
    NotLocal(NodeId),
    #[error("cluster {0} does not exist in the topology")]
    UnknownCluster(ClusterId),
    #[error("the queue of node {0} is closed")]
    QueueClosed(NodeId),
    #[error("message cannot be framed: {0}")]
    Frame(#[from] FrameError),
}

/// Errors that stop a single node. They never take down other nodes.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("routing failed: {0}")]
    Route(#[from] RouteError),
    #[error("inbox of node {0} closed before the node finished")]
    InboxClosed(NodeId),
    #[error("algorithm panicked: {0}")]
    Panicked(String),
    #[error("node {0} was cancelled before it finished")]
    Cancelled(NodeId),
}

#[derive(Error, Debug)]
pub enum BarrierError {
    #[error("barrier task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("ready broadcast failed: {0}")]
    Broadcast(#[from] RouteError),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("unable to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Barrier(#[from] BarrierError),
}
