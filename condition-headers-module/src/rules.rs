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

//! Compiled rules and their evaluation against response headers.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use log::trace;
use pingora_error::Error;
use regex::bytes::Regex;

use crate::configuration::{ConditionHeadersConf, RuleConf, CONFIGURATION_ERROR};

/// Looks up a header, treating empty values like missing headers.
fn non_empty<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a HeaderValue> {
    headers.get(name).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone)]
enum Condition {
    /// Header must not be present
    Absent(HeaderName),
    /// Header must be present and contain a match for the regular expression
    Matches(HeaderName, Regex),
}

impl Condition {
    fn compile(index: usize, name: &str, pattern: &str) -> Result<Self, Box<Error>> {
        let name = parse_name(index, name)?;
        if pattern.is_empty() {
            Ok(Self::Absent(name))
        } else {
            let regex = Regex::new(pattern).map_err(|err| {
                Error::because(
                    CONFIGURATION_ERROR,
                    format!("rule {index}: invalid regular expression for header {name}"),
                    err,
                )
            })?;
            Ok(Self::Matches(name, regex))
        }
    }

    fn holds(&self, headers: &HeaderMap) -> bool {
        match self {
            Self::Absent(name) => non_empty(headers, name).is_none(),
            Self::Matches(name, regex) => {
                non_empty(headers, name).is_some_and(|value| regex.is_match(value.as_bytes()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mutation {
    Remove(HeaderName),
    Set(HeaderName, HeaderValue),
}

impl Mutation {
    fn compile(index: usize, name: &str, value: &str) -> Result<Self, Box<Error>> {
        let name = parse_name(index, name)?;
        if value.is_empty() {
            Ok(Self::Remove(name))
        } else {
            let value = HeaderValue::try_from(value).map_err(|err| {
                Error::because(
                    CONFIGURATION_ERROR,
                    format!("rule {index}: invalid value for header {name}"),
                    err,
                )
            })?;
            Ok(Self::Set(name, value))
        }
    }

    fn apply(&self, headers: &mut HeaderMap) {
        match self {
            Self::Remove(name) => {
                headers.remove(name);
            }
            Self::Set(name, value) => {
                headers.insert(name.clone(), value.clone());
            }
        }
    }
}

fn parse_name(index: usize, name: &str) -> Result<HeaderName, Box<Error>> {
    HeaderName::try_from(name).map_err(|err| {
        Error::because(
            CONFIGURATION_ERROR,
            format!("rule {index}: invalid header name {name:?}"),
            err,
        )
    })
}

#[derive(Debug, Clone)]
struct Rule {
    conditions: Vec<Condition>,
    mutations: Vec<Mutation>,
}

impl Rule {
    fn compile(index: usize, conf: &RuleConf) -> Result<Self, Box<Error>> {
        let conditions = conf
            .conditions
            .iter()
            .map(|(name, pattern)| Condition::compile(index, name, pattern))
            .collect::<Result<_, _>>()?;
        let mutations = conf
            .headers
            .iter()
            .map(|(name, value)| Mutation::compile(index, name, value))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            conditions,
            mutations,
        })
    }

    fn matches(&self, headers: &HeaderMap) -> bool {
        self.conditions.iter().all(|condition| {
            let holds = condition.holds(headers);
            if !holds {
                trace!("Condition {condition:?} doesn’t hold");
            }
            holds
        })
    }
}

/// An ordered list of compiled rules
///
/// Rules are applied in configuration order. The first rule with conditions that don’t hold ends
/// processing, none of the subsequent rules will be considered.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl TryFrom<ConditionHeadersConf> for RuleEngine {
    type Error = Box<Error>;

    fn try_from(conf: ConditionHeadersConf) -> Result<Self, Self::Error> {
        if conf.rules.is_empty() {
            return Err(Error::explain(CONFIGURATION_ERROR, "rules cannot be empty"));
        }

        let rules = conf
            .rules
            .iter()
            .enumerate()
            .map(|(index, rule)| Rule::compile(index, rule))
            .collect::<Result<Vec<_>, _>>()?;
        trace!("Compiled rules: {rules:#?}");

        Ok(Self { rules })
    }
}

impl RuleEngine {
    /// Applies the rules to the given response headers.
    ///
    /// Returns the number of rules that matched and had their header changes applied.
    pub fn apply(&self, headers: &mut HeaderMap) -> usize {
        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.matches(headers) {
                trace!("Rule {index} doesn’t match, skipping remaining rules");
                return index;
            }

            trace!("Rule {index} matches, applying {:?}", rule.mutations);
            for mutation in &rule.mutations {
                mutation.apply(headers);
            }
        }
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::configuration::FromYaml;
    use test_log::test;

    fn make_engine(yaml: &str) -> RuleEngine {
        ConditionHeadersConf::from_yaml(yaml)
            .unwrap()
            .try_into()
            .unwrap()
    }

    fn make_headers(list: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in list {
            headers.append(
                HeaderName::try_from(*name).unwrap(),
                HeaderValue::try_from(*value).unwrap(),
            );
        }
        headers
    }

    fn assert_headers(headers: &HeaderMap, expected: &[(&str, &str)]) {
        let mut headers: Vec<_> = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    value.to_str().unwrap().to_owned(),
                )
            })
            .collect();
        headers.sort();

        let mut expected: Vec<_> = expected
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), (*value).to_owned()))
            .collect();
        expected.sort();

        assert_eq!(headers, expected);
    }

    #[test]
    fn empty_rules() {
        let err = RuleEngine::try_from(ConditionHeadersConf::default()).unwrap_err();
        assert_eq!(err.etype(), &CONFIGURATION_ERROR);
        assert!(err.to_string().contains("rules cannot be empty"));
    }

    #[test]
    fn invalid_rules() {
        let err = RuleEngine::try_from(
            ConditionHeadersConf::from_yaml(
                r#"
                rules:
                - conditions:
                    Content-Type: 'text/(html'
                "#,
            )
            .unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.etype(), &CONFIGURATION_ERROR);

        let err = RuleEngine::try_from(
            ConditionHeadersConf::from_yaml(
                r#"
                rules:
                - headers:
                    X-Test: abc
                - headers:
                    'Invalid Header': abc
                "#,
            )
            .unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.etype(), &CONFIGURATION_ERROR);
        assert!(err.to_string().contains("rule 1"));

        let err = RuleEngine::try_from(
            ConditionHeadersConf::from_yaml(
                "rules:\n- headers:\n    X-Test: \"line\\nbreak\"\n",
            )
            .unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.etype(), &CONFIGURATION_ERROR);
    }

    #[test]
    fn set_and_remove() {
        let engine = make_engine(
            r#"
            rules:
            - headers:
                Cache-Control: no-cache
                Server: ''
                X-Powered-By:
            "#,
        );

        let mut headers = make_headers(&[
            ("Cache-Control", "max-age=3600"),
            ("Cache-Control", "public"),
            ("Server", "Test server"),
            ("Content-Type", "text/html"),
        ]);
        assert_eq!(engine.apply(&mut headers), 1);
        assert_headers(
            &headers,
            &[("Cache-Control", "no-cache"), ("Content-Type", "text/html")],
        );
    }

    #[test]
    fn absent_condition() {
        let engine = make_engine(
            r#"
            rules:
            - conditions:
                Content-Type: ''
              headers:
                Content-Type: 'text/plain; charset=utf-8'
            "#,
        );

        let mut headers = make_headers(&[]);
        assert_eq!(engine.apply(&mut headers), 1);
        assert_headers(&headers, &[("Content-Type", "text/plain; charset=utf-8")]);

        // Empty value is considered absent
        let mut headers = make_headers(&[("Content-Type", "")]);
        assert_eq!(engine.apply(&mut headers), 1);
        assert_headers(&headers, &[("Content-Type", "text/plain; charset=utf-8")]);

        // Any other value fails the condition
        let mut headers = make_headers(&[("Content-Type", "text/html")]);
        assert_eq!(engine.apply(&mut headers), 0);
        assert_headers(&headers, &[("Content-Type", "text/html")]);
    }

    #[test]
    fn pattern_condition() {
        let engine = make_engine(
            r#"
            rules:
            - conditions:
                content-type: 'text/plain.*'
              headers:
                Cache-Control: no-cache
            "#,
        );

        // Header names are case-insensitive, match can be anywhere in the value
        let mut headers = make_headers(&[("Content-Type", "text/plain; charset=utf-8")]);
        assert_eq!(engine.apply(&mut headers), 1);
        assert_headers(
            &headers,
            &[
                ("Content-Type", "text/plain; charset=utf-8"),
                ("Cache-Control", "no-cache"),
            ],
        );

        let mut headers = make_headers(&[("Content-Type", "x-text/plain")]);
        assert_eq!(engine.apply(&mut headers), 1);

        let mut headers = make_headers(&[("Content-Type", "text/html; charset=utf-8")]);
        assert_eq!(engine.apply(&mut headers), 0);
        assert_headers(&headers, &[("Content-Type", "text/html; charset=utf-8")]);

        // Missing header fails the condition
        let mut headers = make_headers(&[]);
        assert_eq!(engine.apply(&mut headers), 0);
        assert_headers(&headers, &[]);

        // Even if the pattern would match an empty string
        let engine = make_engine(
            r#"
            rules:
            - conditions:
                X-Test: '.*'
              headers:
                X-Matched: '1'
            "#,
        );
        let mut headers = make_headers(&[("X-Test", "")]);
        assert_eq!(engine.apply(&mut headers), 0);
        let mut headers = make_headers(&[("X-Test", "anything")]);
        assert_eq!(engine.apply(&mut headers), 1);
        assert_headers(&headers, &[("X-Test", "anything"), ("X-Matched", "1")]);
    }

    #[test]
    fn anchored_pattern() {
        let engine = make_engine(
            r#"
            rules:
            - conditions:
                Content-Type: '^text/html$'
              headers:
                X-Matched: '1'
            "#,
        );

        let mut headers = make_headers(&[("Content-Type", "text/html")]);
        assert_eq!(engine.apply(&mut headers), 1);

        let mut headers = make_headers(&[("Content-Type", "text/html; charset=utf-8")]);
        assert_eq!(engine.apply(&mut headers), 0);
    }

    #[test]
    fn multiple_values() {
        let engine = make_engine(
            r#"
            rules:
            - conditions:
                X-A: html
              headers:
                X-Matched: '1'
            "#,
        );

        // Only the first value is checked
        let mut headers = make_headers(&[("X-A", "no"), ("X-A", "html")]);
        assert_eq!(engine.apply(&mut headers), 0);
        assert_headers(&headers, &[("X-A", "no"), ("X-A", "html")]);

        let mut headers = make_headers(&[("X-A", "html"), ("X-A", "no")]);
        assert_eq!(engine.apply(&mut headers), 1);
        assert_headers(
            &headers,
            &[("X-A", "html"), ("X-A", "no"), ("X-Matched", "1")],
        );

        // An empty first value makes the header absent
        let engine = make_engine(
            r#"
            rules:
            - conditions:
                X-A: ''
              headers:
                X-A: default
            "#,
        );
        let mut headers = make_headers(&[("X-A", ""), ("X-A", "html")]);
        assert_eq!(engine.apply(&mut headers), 1);
        assert_headers(&headers, &[("X-A", "default")]);

        let mut headers = make_headers(&[("X-A", "html"), ("X-A", "")]);
        assert_eq!(engine.apply(&mut headers), 0);
    }

    #[test]
    fn all_conditions_required() {
        let engine = make_engine(
            r#"
            rules:
            - conditions:
                Content-Type: html
                X-Frame-Options: ''
              headers:
                X-Frame-Options: DENY
            "#,
        );

        let mut headers = make_headers(&[("Content-Type", "text/html")]);
        assert_eq!(engine.apply(&mut headers), 1);
        assert_headers(
            &headers,
            &[("Content-Type", "text/html"), ("X-Frame-Options", "DENY")],
        );

        let mut headers = make_headers(&[
            ("Content-Type", "text/html"),
            ("X-Frame-Options", "SAMEORIGIN"),
        ]);
        assert_eq!(engine.apply(&mut headers), 0);
        assert_headers(
            &headers,
            &[
                ("Content-Type", "text/html"),
                ("X-Frame-Options", "SAMEORIGIN"),
            ],
        );

        let mut headers = make_headers(&[("Content-Type", "image/png")]);
        assert_eq!(engine.apply(&mut headers), 0);
        assert_headers(&headers, &[("Content-Type", "image/png")]);
    }

    #[test]
    fn rule_chaining() {
        let engine = make_engine(
            r#"
            rules:
            - conditions:
                Content-Type: html
              headers:
                X-First: '1'
            - conditions:
                X-First: '1'
              headers:
                X-Second: '2'
            - conditions:
                X-Missing: present
              headers:
                X-Third: '3'
            - headers:
                X-Fourth: '4'
            "#,
        );

        // Later rules see changes made by earlier rules, the first failing rule stops processing
        let mut headers = make_headers(&[("Content-Type", "text/html")]);
        assert_eq!(engine.apply(&mut headers), 2);
        assert_headers(
            &headers,
            &[
                ("Content-Type", "text/html"),
                ("X-First", "1"),
                ("X-Second", "2"),
            ],
        );

        // An unconditional rule is not reached if an earlier one fails
        let mut headers = make_headers(&[("Content-Type", "image/png")]);
        assert_eq!(engine.apply(&mut headers), 0);
        assert_headers(&headers, &[("Content-Type", "image/png")]);
    }

    #[test]
    fn mutation_order() {
        let engine = make_engine(
            r#"
            rules:
            - headers:
                x-test: first
                X-Test: second
            "#,
        );

        let mut headers = make_headers(&[]);
        engine.apply(&mut headers);
        assert_headers(&headers, &[("X-Test", "second")]);
    }
}
