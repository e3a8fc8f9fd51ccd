//! Playback service catalog.
//!
//! A [`ServiceDescriptor`] describes one legacy playback target: which
//! identifiers it needs, where its player lives, and how the export flow has
//! to treat it (local hosting, timing mode, script instrumentation).

use std::fmt;

use url::Url;

use crate::ModelError;

/// Identifier a service may require from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identifier {
    MovieId,
    OwnerId,
}

impl Identifier {
    pub fn as_str(self) -> &'static str {
        match self {
            Identifier::MovieId => "movieId",
            Identifier::OwnerId => "movieOwnerId",
        }
    }

    /// Human-readable name used in prompts and errors.
    pub fn label(self) -> &'static str {
        match self {
            Identifier::MovieId => "movie ID",
            Identifier::OwnerId => "owner ID",
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scripts run against the player page after it loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostLoad {
    None,
    /// Replace the document with a plugin embed built from an HTML template.
    RewriteDocument { html: &'static str },
}

/// How capture start relates to navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingMode {
    /// Capture starts only after the page reports playback; no trim-in.
    Default,
    /// Capture starts before navigation; the lead-in is trimmed afterwards.
    Legacy,
}

/// Immutable description of one playback target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Catalog key (`local`, `ft`, ...).
    pub key: &'static str,

    /// Display name.
    pub name: &'static str,

    pub requires: &'static [Identifier],

    /// Address probed by the reachability check.
    pub base_url: &'static str,

    /// URL parts joined in order; each part may contain template placeholders.
    pub player: &'static [&'static str],

    /// Player pages must be served by the local hosting server.
    pub needs_hosting: bool,

    /// The base URL belongs to a component the user runs locally.
    pub hostable: bool,

    pub timing: TimingMode,

    /// Instrumentation is injected on future loads because the page has no
    /// built-in recording controller.
    pub template_wrapper: bool,

    /// Omitted from interactive menus.
    pub hidden: bool,

    /// Browser window title, used by window-capture sources.
    pub window_title: &'static str,

    pub post_load: PostLoad,
}

/// Values substituted into URL and script templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub movie_id: Option<String>,
    pub owner_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub wide: bool,
}

impl TemplateVars {
    /// Replace `{movie_id}`, `{owner_id}`, `{width}`, `{height}` and `{wide}`.
    /// Other braces are left untouched.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{movie_id}", self.movie_id.as_deref().unwrap_or(""))
            .replace("{owner_id}", self.owner_id.as_deref().unwrap_or(""))
            .replace("{width}", &self.width.to_string())
            .replace("{height}", &self.height.to_string())
            .replace("{wide}", if self.wide { "1" } else { "0" })
    }
}

impl ServiceDescriptor {
    pub fn requires(&self, identifier: Identifier) -> bool {
        self.requires.contains(&identifier)
    }

    /// Check that every required identifier is present and non-blank.
    pub fn validate(&self, vars: &TemplateVars) -> Result<(), ModelError> {
        for id in self.requires {
            let value = match id {
                Identifier::MovieId => vars.movie_id.as_deref(),
                Identifier::OwnerId => vars.owner_id.as_deref(),
            };
            if value.map_or(true, |v| v.trim().is_empty()) {
                return Err(ModelError::MissingIdentifier {
                    service: self.name.to_string(),
                    identifier: id.label(),
                });
            }
        }
        Ok(())
    }

    /// Render and join the player URL parts.
    pub fn player_url(&self, vars: &TemplateVars) -> Result<Url, ModelError> {
        let mut parts = self.player.iter().map(|p| vars.render(p));
        let first = parts.next().unwrap_or_else(|| self.base_url.to_string());
        let mut url = parse_url(&first)?;
        for part in parts {
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            url = url.join(&part).map_err(|source| ModelError::InvalidUrl {
                url: part.clone(),
                source,
            })?;
        }
        Ok(url)
    }

    pub fn base_url(&self) -> Result<Url, ModelError> {
        parse_url(self.base_url)
    }

    /// Rendered post-load scripts, in execution order.
    pub fn post_load_scripts(&self, vars: &TemplateVars) -> Vec<String> {
        match self.post_load {
            PostLoad::None => Vec::new(),
            PostLoad::RewriteDocument { html } => {
                let html = vars.render(html);
                // A JSON string literal is a valid JS string literal.
                let literal = serde_json::Value::String(html).to_string();
                vec![
                    "document.open();".to_string(),
                    format!("document.write({literal});"),
                    "document.close();".to_string(),
                ]
            }
        }
    }
}

fn parse_url(raw: &str) -> Result<Url, ModelError> {
    Url::parse(raw).map_err(|source| ModelError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

const FLASHTHEMES_EMBED: &str = concat!(
    "<!DOCTYPE html><html><head><title>FlashThemes</title>",
    "<style>html,body{margin:0;padding:0;width:100%;height:100%;overflow:hidden}",
    "object,embed{width:100%;height:100%}</style>",
    "<script>function obj_DoFSCommand(command,args){switch(command){",
    "case'start':startRecord=Date.now();console.log('Video started '+startRecord);",
    "if(document.getElementById('obj').pause)document.getElementById('obj').pause();",
    "if(document.getElementById('obj').seek)try{document.getElementById('obj').seek(0)}",
    "catch(e){document.getElementById('obj').seek(0.1)}break;",
    "case'stop':stopRecord=Date.now();console.log('Video stopped '+stopRecord);break;}}",
    "</script></head><body>",
    "<object type=\"application/x-shockwave-flash\" ",
    "data=\"https://lightspeed.flashthemes.net/static/animation/aisd82ij/player.swf?v=2\" ",
    "width=\"100%\" height=\"100%\" id=\"obj\">",
    "<param name=\"movie\" value=\"https://lightspeed.flashthemes.net/static/animation/aisd82ij/player.swf?v=2\"/>",
    "<param name=\"allowFullScreen\" value=\"true\"/>",
    "<param name=\"allowScriptAccess\" value=\"always\"/>",
    "<param name=\"flashvars\" value=\"autostart=1&amp;isWide={wide}&amp;ut=-1&amp;isEmbed=1",
    "&amp;playerWidth={width}&amp;playerHeight={height}&amp;apiserver=https://flashthemes.net/",
    "&amp;storePath=https://flashthemes.net/static/store/<store>?v={owner_id}",
    "&amp;clientThemePath=https://lightspeed.flashthemes.net/static/ct/ad44370a650793d9/<client_theme>",
    "&amp;movieId={movie_id}&amp;isVideoRecord=1&amp;isSpeedy=0\"/>",
    "</object></body></html>",
);

/// Every known service, in menu order.
pub const SERVICES: &[ServiceDescriptor] = &[
    ServiceDescriptor {
        key: "local",
        name: "Wrapper: Offline",
        requires: &[Identifier::MovieId],
        base_url: "http://127.0.0.1:4343",
        player: &[
            "http://localhost:26519",
            "index.html?environment=local&movieId={movie_id}&playerWidth={width}&playerHeight={height}&isWide={wide}&isVideoRecord=1",
        ],
        needs_hosting: true,
        hostable: true,
        timing: TimingMode::Default,
        template_wrapper: false,
        hidden: false,
        window_title: "GoExport Viewer",
        post_load: PostLoad::None,
    },
    ServiceDescriptor {
        key: "ft",
        name: "FlashThemes",
        requires: &[Identifier::MovieId, Identifier::OwnerId],
        base_url: "https://flashthemes.net",
        player: &["https://flashthemes.net"],
        needs_hosting: false,
        hostable: false,
        timing: TimingMode::Default,
        template_wrapper: false,
        hidden: false,
        window_title: "FlashThemes",
        post_load: PostLoad::RewriteDocument {
            html: FLASHTHEMES_EMBED,
        },
    },
    ServiceDescriptor {
        key: "local_beta",
        name: "Local (Beta)",
        requires: &[Identifier::MovieId],
        base_url: "http://127.0.0.1:4343",
        player: &[
            "http://127.0.0.1:4343",
            "player?&movieId={movie_id}&playerWidth={width}&playerHeight={height}&isWide={wide}&isVideoRecord=1",
        ],
        needs_hosting: false,
        hostable: true,
        timing: TimingMode::Default,
        template_wrapper: true,
        hidden: true,
        window_title: "Video Player - Wrapper#3A Offline",
        post_load: PostLoad::None,
    },
];

/// Look up a service by catalog key.
pub fn service(key: &str) -> Result<&'static ServiceDescriptor, ModelError> {
    let key = key.trim();
    SERVICES
        .iter()
        .find(|s| s.key == key)
        .ok_or_else(|| ModelError::UnknownService(key.to_string()))
}

/// Services shown in interactive menus.
pub fn visible_services() -> impl Iterator<Item = &'static ServiceDescriptor> {
    SERVICES.iter().filter(|s| !s.hidden)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars {
        TemplateVars {
            movie_id: Some("m-123".to_string()),
            owner_id: Some("42".to_string()),
            width: 1280,
            height: 720,
            wide: true,
        }
    }

    #[test]
    fn test_local_player_url() {
        let url = service("local").unwrap().player_url(&vars()).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:26519/index.html?environment=local&movieId=m-123&playerWidth=1280&playerHeight=720&isWide=1&isVideoRecord=1"
        );
    }

    #[test]
    fn test_local_beta_player_url() {
        let url = service("local_beta").unwrap().player_url(&vars()).unwrap();
        assert_eq!(url.path(), "/player");
        assert!(url.query().unwrap().contains("movieId=m-123"));
        assert_eq!(url.host_str(), Some("127.0.0.1"));
    }

    #[test]
    fn test_missing_identifier_fails_validation() {
        let ft = service("ft").unwrap();
        let mut v = vars();
        v.owner_id = Some("  ".to_string());
        let err = ft.validate(&v).unwrap_err();
        assert!(err.to_string().contains("owner ID"));

        let local = service("local").unwrap();
        v.movie_id = None;
        assert!(local.validate(&v).is_err());
        v.movie_id = Some("x".to_string());
        assert!(local.validate(&v).is_ok());
    }

    #[test]
    fn test_render_leaves_foreign_braces() {
        let out = vars().render("a{b}{width}{{c}}{wide}");
        assert_eq!(out, "a{b}1280{{c}}1");
    }

    #[test]
    fn test_flashthemes_scripts_embed_identifiers() {
        let scripts = service("ft").unwrap().post_load_scripts(&vars());
        assert_eq!(scripts.len(), 3);
        assert_eq!(scripts[0], "document.open();");
        assert!(scripts[1].starts_with("document.write(\""));
        assert!(scripts[1].contains("movieId=m-123"));
        assert!(scripts[1].contains("?v=42"));
        assert!(scripts[1].contains("isWide=1"));
        assert!(scripts[1].contains("stopRecord=Date.now()"));
    }

    #[test]
    fn test_catalog_lookup() {
        assert!(service("nope").is_err());
        assert_eq!(visible_services().count(), 2);
        assert!(service("local").unwrap().needs_hosting);
        assert!(!service("ft").unwrap().hostable);
        assert!(service("local_beta").unwrap().template_wrapper);
    }
}
