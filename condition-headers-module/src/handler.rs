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

use bytes::Bytes;
use http::Request;
use log::{debug, trace};
use pingora_error::Error;

use crate::configuration::ConditionHeadersConf;
use crate::interceptor::ResponseInterceptor;
use crate::rules::RuleEngine;
use crate::sink::{Handler, ResponseSink};

/// Handler wrapping another handler and applying rules to its response headers
#[derive(Debug)]
pub struct ConditionHeadersHandler<H> {
    next: H,
    rules: RuleEngine,
    name: String,
}

impl<H: Handler> ConditionHeadersHandler<H> {
    /// Creates a new handler passing requests on to `next`.
    ///
    /// This will fail if the configuration contains no rules or if any of the rules is invalid.
    pub fn new(
        next: H,
        conf: ConditionHeadersConf,
        name: impl Into<String>,
    ) -> Result<Self, Box<Error>> {
        let name = name.into();
        debug!("Condition headers configuration received for {name}: {conf:#?}");

        let rules = conf.try_into()?;
        Ok(Self { next, rules, name })
    }

    /// Returns the name this handler was created with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<H: Handler> Handler for ConditionHeadersHandler<H> {
    fn handle(
        &self,
        request: &Request<Bytes>,
        response: &mut dyn ResponseSink,
    ) -> Result<(), Box<Error>> {
        let mut interceptor = ResponseInterceptor::new(response);

        // If the handler fails, the interceptor sends whatever it has on drop.
        self.next.handle(request, &mut interceptor)?;

        let applied = self.rules.apply(interceptor.headers_mut());
        trace!("{}: {applied} rule(s) applied to response headers", self.name);

        interceptor.commit()
    }
}
