// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Response sink and request handler abstractions.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Request, StatusCode};
use log::warn;
use pingora_error::Error;

/// Destination of a response, typically the client connection
///
/// Response headers can be changed until the status is written. Writing the status sends the
/// status line along with the headers, writing body data without a status implies `200 OK`.
pub trait ResponseSink {
    /// Returns the response headers that will be sent along with the status.
    fn headers(&self) -> &HeaderMap;

    /// Returns a mutable reference to the response headers that will be sent along with the
    /// status.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sends the status line and the response headers.
    fn write_status(&mut self, status: StatusCode);

    /// Sends a chunk of response body.
    fn write_body(&mut self, data: &[u8]) -> Result<(), Box<Error>>;
}

/// Trait to be implemented by request handlers
pub trait Handler: Send + Sync {
    /// Produces the response for the request.
    fn handle(
        &self,
        request: &Request<Bytes>,
        response: &mut dyn ResponseSink,
    ) -> Result<(), Box<Error>>;
}

/// A [`Handler`] implementation delegating to a function, see [`handler_fn`]
#[derive(Clone, Copy)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&Request<Bytes>, &mut dyn ResponseSink) -> Result<(), Box<Error>> + Send + Sync,
{
    fn handle(
        &self,
        request: &Request<Bytes>,
        response: &mut dyn ResponseSink,
    ) -> Result<(), Box<Error>> {
        (self.f)(request, response)
    }
}

/// Turns a function or closure into a [`Handler`].
///
/// ```rust
/// use condition_headers_module::{handler_fn, Handler, ResponseRecorder, ResponseSink};
/// use http::{header, Request, StatusCode};
///
/// let handler = handler_fn(|_request, response| {
///     response
///         .headers_mut()
///         .insert(header::CONTENT_TYPE, "text/plain".try_into().unwrap());
///     response.write_status(StatusCode::OK);
///     response.write_body(b"Hello, world!")
/// });
///
/// let mut recorder = ResponseRecorder::new();
/// handler.handle(&Request::new(Default::default()), &mut recorder).unwrap();
/// assert_eq!(recorder.body(), b"Hello, world!");
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&Request<Bytes>, &mut dyn ResponseSink) -> Result<(), Box<Error>> + Send + Sync,
{
    HandlerFn { f }
}

/// An in-memory [`ResponseSink`] recording everything written to it
///
/// The headers are recorded as they were at the time the status was written, any later changes
/// are not visible to the “client.”
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    headers: HeaderMap,
    written: Option<(StatusCode, HeaderMap)>,
    status_writes: usize,
    body: BytesMut,
}

impl ResponseRecorder {
    /// Creates a recorder with no headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status and headers sent if any.
    pub fn response_written(&self) -> Option<(StatusCode, &HeaderMap)> {
        self.written
            .as_ref()
            .map(|(status, headers)| (*status, headers))
    }

    /// Returns the number of times `write_status` has been called.
    pub fn status_writes(&self) -> usize {
        self.status_writes
    }

    /// Returns the response body received so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl ResponseSink for ResponseRecorder {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        self.status_writes += 1;
        match self.written {
            Some((written, _)) => {
                warn!("Ignoring status {status}, response with status {written} already sent")
            }
            None => self.written = Some((status, self.headers.clone())),
        }
    }

    fn write_body(&mut self, data: &[u8]) -> Result<(), Box<Error>> {
        if self.written.is_none() {
            self.write_status(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
        Ok(())
    }
}
