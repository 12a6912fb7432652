// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The single-consumer dispatch loop: every mutating access to the memory
//! banks happens on this one task, so handlers never need to lock against
//! each other.

use std::sync::Arc;

use crate::banks::RequestSink;
use crate::frame::{Exception, Frame};
use crate::Server;

/// An inbound frame paired with the sink its response must be written to.
///
/// Created by a reader task on every successfully parsed ADU; consumed and
/// dropped by the dispatcher once the response has been written.
pub(crate) struct Request {
    pub(crate) frame: Box<dyn Frame>,
    pub(crate) sink: Arc<dyn RequestSink>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("frame", &self.frame)
            .field("sink", &self.sink)
            .finish()
    }
}

/// Runs until `receiver` is closed (i.e. the owning [`Server`] has been
/// dropped or [`Server::close`](crate::Server::close) aborted this task).
pub(crate) async fn run(server: Arc<Server>, mut receiver: tokio::sync::mpsc::Receiver<Request>) {
    while let Some(request) = receiver.recv().await {
        dispatch_one(&server, request).await;
    }
}

async fn dispatch_one(server: &Arc<Server>, request: Request) {
    let Request { frame, sink } = request;

    if let Some(connection_id) = sink.connection_id() {
        server.watchdog().feed(connection_id);
    }

    let mut response = frame.to_response_boxed();
    match server.function_table().get(frame.function()) {
        Some(handler) => match handler(server, frame.data()) {
            Ok(body) => response.set_data(body),
            Err(exception) => response.set_exception(exception),
        },
        None => response.set_exception(Exception::IllegalFunction),
    }

    let encoded = response.encode();
    if let Err(err) = sink.write_all(&encoded).await {
        log::error!("failed to write Modbus response: {err}");
    }
}
