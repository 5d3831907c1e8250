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

//! Deferring response commitment so that headers can be changed after the handler is done.

use bytes::BytesMut;
use http::{HeaderMap, StatusCode};
use log::{error, trace, warn};
use pingora_error::Error;

use crate::sink::ResponseSink;

/// A [`ResponseSink`] wrapper holding back the response
///
/// Status and body data written by the handler are buffered, headers are accessed directly in the
/// wrapped sink. Nothing is sent until [`ResponseInterceptor::commit`] is called. If the
/// interceptor is dropped without being committed (e.g. because the handler returned an error or
/// panicked), the commit happens on drop.
pub struct ResponseInterceptor<'a> {
    inner: &'a mut dyn ResponseSink,
    status: Option<StatusCode>,
    body: BytesMut,
    committed: bool,
}

impl<'a> ResponseInterceptor<'a> {
    /// Wraps a response sink.
    pub fn new(inner: &'a mut dyn ResponseSink) -> Self {
        Self {
            inner,
            status: None,
            body: BytesMut::new(),
            committed: false,
        }
    }

    /// Returns the status that will be sent on commit.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Returns the body data buffered so far.
    pub fn buffered_body(&self) -> &[u8] {
        &self.body
    }

    /// Returns `true` if the response has been sent already.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Sends status, headers and buffered body to the wrapped sink.
    ///
    /// Only the first call has an effect. The headers must not be changed after this.
    pub fn commit(&mut self) -> Result<(), Box<Error>> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;

        let status = self.status();
        trace!(
            "Committing response with status {status}, {} headers and {} body bytes",
            self.inner.headers().len(),
            self.body.len()
        );

        self.inner.write_status(status);
        if !self.body.is_empty() {
            let body = self.body.split();
            self.inner.write_body(&body)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResponseInterceptor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseInterceptor")
            .field("status", &self.status)
            .field("headers", self.inner.headers())
            .field("buffered", &self.body.len())
            .field("committed", &self.committed)
            .finish()
    }
}

impl ResponseSink for ResponseInterceptor<'_> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        if self.committed {
            warn!("Response headers accessed for modification after the response has been sent");
        }
        self.inner.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.committed {
            self.inner.write_status(status);
        } else if let Some(previous) = self.status {
            warn!("Ignoring status {status}, handler already set status {previous}");
        } else {
            self.status = Some(status);
        }
    }

    fn write_body(&mut self, data: &[u8]) -> Result<(), Box<Error>> {
        if self.committed {
            self.inner.write_body(data)
        } else {
            self.body.extend_from_slice(data);
            Ok(())
        }
    }
}

impl Drop for ResponseInterceptor<'_> {
    fn drop(&mut self) {
        if !self.committed {
            trace!("Response interceptor dropped without commit, committing now");
            if let Err(err) = self.commit() {
                error!("Failed sending buffered response: {err}");
            }
        }
    }
}
