//! Variable substitution: replace `$(name)` / `$name` occurrences with their
//! assigned values.
//!
//! Grounded on `fz/engine.py::replace_variables_in_content`.

use regex::Regex;

use crate::prelude::*;
use crate::value::ScalarValue;

pub fn substitute_variables(
    content: &str,
    bindings: &[(String, ScalarValue)],
    var_prefix: &str,
    delim: &str,
) -> AppResult<String> {
    let prefix = regex::escape(var_prefix);
    let lookup: std::collections::HashMap<&str, String> =
        bindings.iter().map(|(name, value)| (name.as_str(), value.to_string())).collect();

    let mut out = content.to_owned();

    if delim.chars().count() == 2 {
        let mut chars = delim.chars();
        let left = regex::escape(&chars.next().unwrap().to_string());
        let right = regex::escape(&chars.next().unwrap().to_string());

        // `${name}` or `${name~default}`: bound names substitute their value;
        // unbound names with a default substitute the default and warn;
        // unbound names with no default are left untouched.
        let delimited = Regex::new(&format!("{prefix}{left}([a-zA-Z_][a-zA-Z0-9_]*)(?:~([^{right}]*))?{right}"))
            .into_diagnostic()?;
        out = delimited
            .replace_all(&out, |caps: &regex::Captures| {
                let name = &caps[1];
                if let Some(value) = lookup.get(name) {
                    value.clone()
                } else if let Some(default) = caps.get(2) {
                    let default = default.as_str();
                    tracing::warn!("variable '{name}' not found in input_variables, using default value: '{default}'");
                    default.to_owned()
                } else {
                    caps[0].to_owned()
                }
            })
            .into_owned();

        for (name, value) in bindings {
            let esc_name = regex::escape(name);
            let rendered = value.to_string();
            let bare = Regex::new(&format!(r"{prefix}{esc_name}\b")).into_diagnostic()?;
            out = bare.replace_all(&out, regex::NoExpand(&rendered)).into_owned();
        }
    } else {
        for (name, value) in bindings {
            let esc_name = regex::escape(name);
            let rendered = value.to_string();
            let bare = Regex::new(&format!(r"{prefix}{esc_name}\b")).into_diagnostic()?;
            out = bare.replace_all(&out, regex::NoExpand(&rendered)).into_owned();
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_both_delimited_and_bare_forms() {
        let bindings = vec![("x".to_owned(), ScalarValue::Int(7))];
        let out = substitute_variables("a=$x b=$(x)", &bindings, "$", "()").unwrap();
        assert_eq!(out, "a=7 b=7");
    }

    #[test]
    fn bare_substitution_does_not_eat_longer_names() {
        let bindings = vec![("x".to_owned(), ScalarValue::Int(1))];
        let out = substitute_variables("$x2 stays", &bindings, "$", "()").unwrap();
        assert_eq!(out, "$x2 stays");
    }

    #[test]
    fn no_delim_substitutes_bare_only() {
        let bindings = vec![("y".to_owned(), ScalarValue::Str("hi".to_owned()))];
        let out = substitute_variables("val=$y", &bindings, "$", "").unwrap();
        assert_eq!(out, "val=hi");
    }

    #[test]
    fn unbound_delimited_variable_falls_back_to_its_default() {
        let out = substitute_variables("p=${port~8080}", &[], "$", "{}").unwrap();
        assert_eq!(out, "p=8080");
    }

    #[test]
    fn bound_variable_wins_over_its_own_default() {
        let bindings = vec![("port".to_owned(), ScalarValue::Int(9090))];
        let out = substitute_variables("p=${port~8080}", &bindings, "$", "{}").unwrap();
        assert_eq!(out, "p=9090");
    }

    #[test]
    fn unbound_delimited_variable_without_default_is_left_untouched() {
        let out = substitute_variables("p=${port}", &[], "$", "{}").unwrap();
        assert_eq!(out, "p=${port}");
    }
}
