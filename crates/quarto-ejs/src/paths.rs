/*
 * paths.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! URL-style path resolution against a base directory.
//!
//! Template paths are slash-separated strings, not filesystem paths: they
//! are resolved textually and handed to a [`TemplateReader`](crate::TemplateReader)
//! which decides what they mean.

use serde::{Deserialize, Serialize};

/// Strip all leading and trailing `/` characters.
pub fn trim_slash(url: &str) -> &str {
    url.trim_matches('/')
}

/// Join `relative` onto `base` and normalize the result.
///
/// Empty and `.` segments are dropped, `..` pops the previous segment
/// (never past the root). A trailing `/` on `relative` leaves the result
/// naming a directory, which is how `"file.ejs" + "../"` yields the
/// file's directory.
pub fn concat_and_resolve(base: &str, relative: &str) -> String {
    let joined = if base.is_empty() {
        relative.to_string()
    } else {
        format!("{base}/{relative}")
    };

    let mut stack: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            segment => stack.push(segment),
        }
    }
    stack.join("/")
}

/// The base directory that relative template paths resolve against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaseDir(String);

impl BaseDir {
    pub fn new(url: &str) -> Self {
        BaseDir(trim_slash(url).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `url` already lives under the base directory.
    ///
    /// This is a textual prefix test on the slash-trimmed path, so with no
    /// base directory every path is absolute.
    pub fn is_absolute(&self, url: &str) -> bool {
        trim_slash(url).starts_with(self.0.as_str())
    }

    /// Resolve `path` against the base unless it is already absolute.
    pub fn resolve(&self, path: &str) -> String {
        if self.is_absolute(path) {
            path.to_string()
        } else {
            concat_and_resolve(&self.0, path)
        }
    }

    /// The directory containing `path`, after resolving it.
    pub fn directory_of(&self, path: &str) -> String {
        concat_and_resolve(&self.resolve(path), "../")
    }

    /// Resolve the target of an include directive.
    ///
    /// Relative targets resolve against the including template's directory
    /// when the template has a filename, and against the base otherwise.
    pub fn resolve_include(&self, target: &str, including: Option<&str>) -> String {
        if self.is_absolute(target) {
            return target.to_string();
        }
        match including {
            Some(filename) => concat_and_resolve(&self.directory_of(filename), target),
            None => concat_and_resolve(&self.0, target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_slash() {
        assert_eq!(trim_slash("/views/"), "views");
        assert_eq!(trim_slash("//a/b//"), "a/b");
        assert_eq!(trim_slash("plain"), "plain");
    }

    #[test]
    fn test_concat_and_resolve() {
        assert_eq!(concat_and_resolve("a/b", "c.ejs"), "a/b/c.ejs");
        assert_eq!(concat_and_resolve("a/b", "../c.ejs"), "a/c.ejs");
        assert_eq!(concat_and_resolve("a/b", "./c/./d.ejs"), "a/b/c/d.ejs");
        assert_eq!(concat_and_resolve("a", "../../x"), "x");
        assert_eq!(concat_and_resolve("", "x/y"), "x/y");
    }

    #[test]
    fn test_directory_of_file() {
        assert_eq!(concat_and_resolve("views/user/show.ejs", "../"), "views/user");
    }

    #[test]
    fn test_base_dir() {
        let base = BaseDir::new("/views/");
        assert_eq!(base.as_str(), "views");
        assert!(base.is_absolute("views/user.ejs"));
        assert!(base.is_absolute("/views/user.ejs"));
        assert!(!base.is_absolute("user.ejs"));
        assert_eq!(base.resolve("user.ejs"), "views/user.ejs");
        assert_eq!(base.resolve("views/user.ejs"), "views/user.ejs");
        assert_eq!(base.directory_of("user/show.ejs"), "views/user");
    }

    #[test]
    fn test_resolve_include() {
        let base = BaseDir::new("views");
        assert_eq!(
            base.resolve_include("menu.ejs", Some("views/layout/page.ejs")),
            "views/layout/menu.ejs"
        );
        assert_eq!(
            base.resolve_include("../shared/menu.ejs", Some("layout/page.ejs")),
            "views/shared/menu.ejs"
        );
        assert_eq!(base.resolve_include("menu.ejs", None), "views/menu.ejs");
        assert_eq!(
            base.resolve_include("views/menu.ejs", Some("layout/page.ejs")),
            "views/menu.ejs"
        );
    }

    #[test]
    fn test_empty_base() {
        let base = BaseDir::default();
        assert!(base.is_absolute("a/b.ejs"));
        assert!(base.is_absolute("/a/b.ejs"));
        assert!(base.is_absolute("../a.ejs"));
        assert_eq!(base.resolve("a/b.ejs"), "a/b.ejs");
        assert_eq!(base.directory_of("a/b.ejs"), "a");
        assert_eq!(base.resolve_include("menu.ejs", Some("a/b.ejs")), "menu.ejs");
        assert_eq!(base.resolve_include("a/menu.ejs", Some("a/b.ejs")), "a/menu.ejs");
        assert_eq!(base.resolve_include("/menu.ejs", Some("a/b.ejs")), "/menu.ejs");
    }
}
