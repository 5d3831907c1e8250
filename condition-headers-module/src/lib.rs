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

//! # Condition Headers Module
//!
//! This crate allows changing HTTP response headers depending on the headers a handler produced.
//! The handler of this module wraps another handler. It holds back the response of the wrapped
//! handler until it is done, then applies its rules to the response headers and only then sends
//! status, headers and body to the client.
//!
//! A configuration could look like this:
//!
//! ```yaml
//! rules:
//! - conditions:
//!     Content-Type: "^text/html"
//!   headers:
//!     Cache-Control: "no-cache, must-revalidate"
//! - conditions:
//!     Content-Type: ""
//!   headers:
//!     Content-Type: "text/plain; charset=utf-8"
//!     X-Powered-By: ""
//! ```
//!
//! The first rule sets `Cache-Control` header on HTML responses. If it applied, the second rule
//! sets a default `Content-Type` header for responses without one and removes the
//! `X-Powered-By` header.
//!
//! ## Rule format
//!
//! Each rule has `conditions` and `headers` entries, both mapping header names to strings.
//! Header names are case-insensitive.
//!
//! A condition with an empty string requires the header to be absent, an empty header value is
//! considered absent as well. Any other string is a regular expression. The header has to be
//! present and its value has to contain a match for the regular expression. Use `^` and `$` to
//! match the entire value. All conditions of a rule have to hold.
//!
//! If all conditions hold, the changes listed under `headers` are applied in the order listed.
//! An empty string removes the header, any other value replaces it.
//!
//! ## Rule order
//!
//! Rules are processed in the order configured, later rules see the changes made by earlier
//! rules. Processing stops at the first rule with conditions that don’t hold: none of the
//! subsequent rules will be applied, even if their conditions would hold.
//!
//! ## Code example
//!
//! ```rust
//! use condition_headers_module::{
//!     handler_fn, ConditionHeadersConf, ConditionHeadersHandler, FromYaml, Handler,
//!     ResponseRecorder, ResponseSink,
//! };
//! use http::{header, Request, StatusCode};
//!
//! let next = handler_fn(|_request, response| {
//!     response
//!         .headers_mut()
//!         .insert(header::CONTENT_TYPE, "text/html".try_into().unwrap());
//!     response.write_status(StatusCode::OK);
//!     response.write_body(b"<p>Hello, world!</p>")
//! });
//!
//! let conf = ConditionHeadersConf::from_yaml(
//!     r#"
//!     rules:
//!     - conditions:
//!         Content-Type: "^text/html"
//!       headers:
//!         Cache-Control: "no-cache, must-revalidate"
//!     "#,
//! )
//! .unwrap();
//! let handler = ConditionHeadersHandler::new(next, conf, "condition-headers").unwrap();
//!
//! let mut response = ResponseRecorder::new();
//! handler
//!     .handle(&Request::new(Default::default()), &mut response)
//!     .unwrap();
//!
//! let (status, headers) = response.response_written().unwrap();
//! assert_eq!(status, StatusCode::OK);
//! assert_eq!(headers[header::CACHE_CONTROL], "no-cache, must-revalidate");
//! ```

pub mod configuration;
mod deserialize;
mod handler;
mod interceptor;
mod rules;
mod sink;

pub use configuration::{ConditionHeadersConf, FromYaml, RuleConf, CONFIGURATION_ERROR};
pub use handler::ConditionHeadersHandler;
pub use interceptor::ResponseInterceptor;
pub use rules::RuleEngine;
pub use sink::{handler_fn, Handler, HandlerFn, ResponseRecorder, ResponseSink};
