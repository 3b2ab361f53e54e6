// Parameter Resolver
// Expands %(name)s tokens in command templates

use crate::config::Parameters;
use crate::pattern::Fields;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("unresolved parameter '%({token})s'")]
    Unresolved { token: String },

    #[error("malformed parameter token at offset {offset} in '{template}'")]
    Malformed { template: String, offset: usize },
}

/// Configuration visible to one work item: task-local parameters shadow global ones
#[derive(Debug, Clone, Copy)]
pub struct ParameterScope<'a> {
    local: &'a Parameters,
    global: &'a Parameters,
}

impl<'a> ParameterScope<'a> {
    pub fn new(local: &'a Parameters, global: &'a Parameters) -> Self {
        Self { local, global }
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.local.get(name).or_else(|| self.global.get(name))
    }
}

/// Replace every `%(name)s` token in `template`.
///
/// Lookup order is captured fields, then configuration. `%%` produces a literal
/// percent sign; a `%` that does not start a token is kept as is.
pub fn resolve(
    template: &str,
    fields: &Fields,
    scope: &ParameterScope<'_>,
) -> Result<String, ParameterError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('%') {
            out.push('%');
            offset += pos + 2;
            rest = tail;
            continue;
        }

        if let Some(body) = after.strip_prefix('(') {
            let close = body.find(")s").ok_or_else(|| ParameterError::Malformed {
                template: template.to_string(),
                offset: offset + pos,
            })?;
            let name = &body[..close];
            if name.is_empty() || name.contains(['(', ')', '%']) {
                return Err(ParameterError::Malformed {
                    template: template.to_string(),
                    offset: offset + pos,
                });
            }

            let value = fields
                .get(name)
                .map(String::as_str)
                .or_else(|| scope.get(name))
                .ok_or_else(|| ParameterError::Unresolved {
                    token: name.to_string(),
                })?;
            out.push_str(value);

            let consumed = pos + 1 + 1 + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
            continue;
        }

        out.push('%');
        offset += pos + 1;
        rest = after;
    }
    out.push_str(rest);

    Ok(out)
}

/// Token names referenced by a template, in order of appearance
pub fn tokens(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('%') {
            rest = tail;
        } else if let Some(body) = after.strip_prefix('(') {
            match body.find(")s") {
                Some(close) => {
                    let name = body[..close].to_string();
                    if !name.is_empty() && !names.contains(&name) {
                        names.push(name);
                    }
                    rest = &body[close + 2..];
                }
                None => break,
            }
        } else {
            rest = after;
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        let mut p = Parameters::default();
        for (k, v) in pairs {
            p.insert(*k, *v);
        }
        p
    }

    #[test]
    fn test_fields_take_precedence() {
        let global = params(&[("track", "from-config"), ("genome", "hg38")]);
        let local = Parameters::default();
        let scope = ParameterScope::new(&local, &global);

        let resolved = resolve(
            "align %(track)s --genome=%(genome)s",
            &fields(&[("track", "ctrl")]),
            &scope,
        )
        .unwrap();
        assert_eq!(resolved, "align ctrl --genome=hg38");
    }

    #[test]
    fn test_task_local_overrides_global() {
        let global = params(&[("threads", "1")]);
        let local = params(&[("threads", "8")]);
        let scope = ParameterScope::new(&local, &global);

        let resolved = resolve("-p %(threads)s", &Fields::new(), &scope).unwrap();
        assert_eq!(resolved, "-p 8");
    }

    #[test]
    fn test_unresolved_token_is_an_error() {
        let empty = Parameters::default();
        let scope = ParameterScope::new(&empty, &empty);

        let err = resolve("cat %(missing)s", &Fields::new(), &scope).unwrap_err();
        assert_eq!(
            err,
            ParameterError::Unresolved {
                token: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_empty_value_is_kept() {
        let global = params(&[("extra", "")]);
        let empty = Parameters::default();
        let scope = ParameterScope::new(&empty, &global);

        assert_eq!(resolve("run%(extra)s", &Fields::new(), &scope).unwrap(), "run");
    }

    #[test]
    fn test_percent_handling() {
        let empty = Parameters::default();
        let scope = ParameterScope::new(&empty, &empty);

        assert_eq!(
            resolve("printf '%%s' 50% done", &Fields::new(), &scope).unwrap(),
            "printf '%s' 50% done"
        );
    }

    #[test]
    fn test_malformed_token() {
        let empty = Parameters::default();
        let scope = ParameterScope::new(&empty, &empty);

        assert!(matches!(
            resolve("echo %(unterminated", &Fields::new(), &scope),
            Err(ParameterError::Malformed { .. })
        ));
        assert!(matches!(
            resolve("echo %()s", &Fields::new(), &scope),
            Err(ParameterError::Malformed { .. })
        ));
    }

    #[test]
    fn test_tokens() {
        assert_eq!(
            tokens("zcat %(infile)s | tool %(opt)s %% > %(outfile)s %(opt)s"),
            vec!["infile", "opt", "outfile"]
        );
        assert!(tokens("echo plain").is_empty());
    }
}
