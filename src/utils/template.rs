//! String template rendering utilities.

pub struct TemplateVars;

impl TemplateVars {
    pub const OLD_REV: &'static str = "oldrev";
    pub const NEW_REV: &'static str = "newrev";
}

/// Replace each `{{key}}` placeholder with its value.
pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_every_occurrence() {
        let out = render("{{oldrev}}..{{newrev}} ({{oldrev}})", &[("oldrev", "a"), ("newrev", "b")]);
        assert_eq!(out, "a..b (a)");
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        assert_eq!(render("{{other}}", &[("oldrev", "a")]), "{{other}}");
    }
}
