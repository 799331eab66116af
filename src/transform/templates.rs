use std::fs;

use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use serde_json::{Map, Value};

use crate::output::Asset;
use crate::transform::{Transform, TransformContext};

/// Renders Jinja-style templates into HTML pages.
///
/// The optional data file is read again on every run, its top-level keys are
/// available as variables in every template. Templates may `include` or
/// `extends` any file below `root`.
#[derive(Debug, Clone)]
pub struct RenderTemplates {
    /// Directory used to resolve `include` and `extends`.
    pub root: Utf8PathBuf,
    /// JSON document exposed to templates.
    pub data: Option<Utf8PathBuf>,
}

impl RenderTemplates {
    fn load_data(&self) -> anyhow::Result<Map<String, Value>> {
        let Some(path) = &self.data else {
            return Ok(Map::new());
        };

        let text =
            fs::read_to_string(path).with_context(|| format!("couldn't read data file '{path}'"))?;

        match serde_json::from_str::<Value>(&text)
            .with_context(|| format!("malformed data file '{path}'"))?
        {
            Value::Object(map) => Ok(map),
            _ => bail!("data file '{path}' must contain a JSON object"),
        }
    }
}

/// Places the live-reload script right before `</body>`, or at the end of the
/// document when there is no body.
fn inject_script(mut html: String, script: &str) -> String {
    let tag = format!("<script>{script}</script>\n");

    match html.rfind("</body>") {
        Some(index) => html.insert_str(index, &tag),
        None => html.push_str(&tag),
    }

    html
}

impl Transform for RenderTemplates {
    fn name(&self) -> &'static str {
        "templates"
    }

    fn apply(&self, ctx: &TransformContext, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let data = self.load_data()?;
        let script = ctx.env.get_refresh_script();

        let mut env = minijinja::Environment::new();
        env.set_keep_trailing_newline(true);
        env.set_loader(minijinja::path_loader(&self.root));

        for asset in &assets {
            let source = asset
                .text()
                .with_context(|| format!("'{}' is not valid UTF-8", asset.path))?;
            env.add_template_owned(asset.path.to_string(), source.to_owned())
                .with_context(|| format!("couldn't parse template '{}'", asset.path))?;
        }

        let mut out = Vec::with_capacity(assets.len());

        for asset in &assets {
            let html = env
                .get_template(asset.path.as_str())?
                .render(&data)
                .with_context(|| format!("couldn't render template '{}'", asset.path))?;

            let html = match &script {
                Some(script) => inject_script(html, script),
                None => html,
            };

            out.push(Asset::new(asset.path.with_extension("html"), html));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;
    use crate::transform::testing;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
            Self { _dir: dir, root }
        }

        fn write(&self, path: &str, text: &str) -> Utf8PathBuf {
            let path = self.root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, text).unwrap();
            path
        }

        fn renderer(&self) -> RenderTemplates {
            RenderTemplates {
                root: self.root.join("html"),
                data: Some(self.root.join("website.json")),
            }
        }
    }

    fn render(renderer: &RenderTemplates, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let env = testing::env();
        let ctx = TransformContext {
            category: "templates",
            env: &env,
        };
        renderer.apply(&ctx, assets)
    }

    #[test]
    fn test_renders_with_data() {
        let fx = Fixture::new();
        fx.write("website.json", r#"{ "title": "Hello", "items": [1, 2] }"#);

        let out = render(
            &fx.renderer(),
            vec![Asset::new(
                "index.twig",
                "<h1>{{ title }}</h1>{% for i in items %}<i>{{ i }}</i>{% endfor %}",
            )],
        )
        .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "index.html");
        assert_eq!(out[0].text().unwrap(), "<h1>Hello</h1><i>1</i><i>2</i>");
    }

    #[test]
    fn test_includes_from_root() {
        let fx = Fixture::new();
        fx.write("website.json", r#"{ "name": "site" }"#);
        fx.write("html/partials/head.twig", "<title>{{ name }}</title>");

        let out = render(
            &fx.renderer(),
            vec![Asset::new("page.twig", "{% include \"partials/head.twig\" %}")],
        )
        .unwrap();

        assert_eq!(out[0].text().unwrap(), "<title>site</title>");
    }

    #[test]
    fn test_data_is_read_fresh() {
        let fx = Fixture::new();
        let renderer = fx.renderer();
        let page = vec![Asset::new("a.twig", "{{ v }}")];

        fx.write("website.json", r#"{ "v": "one" }"#);
        assert_eq!(render(&renderer, page.clone()).unwrap()[0].text().unwrap(), "one");

        fx.write("website.json", r#"{ "v": "two" }"#);
        assert_eq!(render(&renderer, page).unwrap()[0].text().unwrap(), "two");
    }

    #[test]
    fn test_missing_data_file_is_an_error() {
        let fx = Fixture::new();
        let result = render(&fx.renderer(), vec![Asset::new("a.twig", "x")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_data_file_is_an_error() {
        let fx = Fixture::new();
        fx.write("website.json", "{ not json");
        assert!(render(&fx.renderer(), vec![Asset::new("a.twig", "x")]).is_err());

        fx.write("website.json", "[1, 2, 3]");
        assert!(render(&fx.renderer(), vec![Asset::new("a.twig", "x")]).is_err());
    }

    #[test]
    fn test_no_data_file() {
        let fx = Fixture::new();
        let renderer = RenderTemplates {
            root: fx.root.clone(),
            data: None,
        };

        let out = render(&renderer, vec![Asset::new("a.twig", "static")]).unwrap();
        assert_eq!(out[0].text().unwrap(), "static");
    }

    #[test]
    fn test_reload_script_in_watch_mode() {
        let fx = Fixture::new();
        fx.write("website.json", "{}");

        let mut env = testing::env();
        env.mode = Mode::Watch;
        env.port = Some(4000);
        let ctx = TransformContext {
            category: "templates",
            env: &env,
        };

        let out = fx
            .renderer()
            .apply(&ctx, vec![Asset::new("a.twig", "<body><p>x</p></body>")])
            .unwrap();

        let html = out[0].text().unwrap();
        assert!(html.contains("ws://localhost:4000"));
        assert!(html.ends_with("</script>\n</body>"));
    }

    #[test]
    fn test_inject_without_body() {
        assert_eq!(inject_script("<p>".into(), "s()"), "<p><script>s()</script>\n");
    }
}
