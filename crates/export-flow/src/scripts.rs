//! Page instrumentation.
//!
//! The player reports playback boundaries through two page globals holding
//! page-clock milliseconds: `startRecord` once playback begins and
//! `stopRecord` once it ends. Players that do not set them natively get the
//! hook below.

/// Global set when playback begins.
pub const STARTED_GLOBAL: &str = "startRecord";

/// Global set when playback ends.
pub const STOPPED_GLOBAL: &str = "stopRecord";

/// Routes the player's FSCommand calls into the two globals.
pub const FSCOMMAND_HOOK: &str = concat!(
    "(function(){",
    "var handler=function(command,args){",
    "if(command==='start'&&window.startRecord===undefined){window.startRecord=Date.now();}",
    "else if(command==='stop'&&window.stopRecord===undefined){window.stopRecord=Date.now();}",
    "};",
    "['obj','player','Player'].forEach(function(id){window[id+'_DoFSCommand']=handler;});",
    "})();",
);

/// Resumes a player that paused itself on its first frame.
pub const RESUME_PLAYBACK: &str =
    "(function(){var o=document.getElementById('obj');if(o&&typeof o.play==='function'){o.play();}})();";

/// Bootstrap page telling the viewer which recorder is in use.
pub fn start_page(assets_dir: &std::path::Path, obs: bool) -> String {
    format!("{}?obs={obs}", file_url(&assets_dir.join("start.html")))
}

/// Page asking the user not to touch the screen while recording.
pub fn warning_page(assets_dir: &std::path::Path, width: u32, height: u32) -> String {
    format!("{}?w={width}&h={height}", file_url(&assets_dir.join("warning.html")))
}

fn file_url(path: &std::path::Path) -> String {
    match url::Url::from_file_path(path) {
        Ok(url) => url.to_string(),
        Err(()) => format!("file://{}", path.display()),
    }
}
