//! Programming language detection from file extensions, file names and shebang lines

use std::path::Path;

/// Language reported for files nothing else matched
pub const FALLBACK_LANGUAGE: &str = "Text";

/// Detect programming language from file extension
pub fn detect_language(extension: &str) -> Option<String> {
    let lang = match extension.to_lowercase().as_str() {
        // Programming languages
        "rs" => "Rust",
        "py" | "pyi" => "Python",
        "js" | "mjs" | "cjs" => "JavaScript",
        "ts" | "mts" | "cts" => "TypeScript",
        "jsx" => "JavaScript (JSX)",
        "tsx" => "TypeScript (TSX)",
        "java" => "Java",
        "cpp" | "cc" | "cxx" => "C++",
        "c" => "C",
        "h" | "hpp" | "hxx" | "hh" => "C/C++ Header",
        "cs" => "C#",
        "go" => "Go",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "kt" | "kts" => "Kotlin",
        "scala" => "Scala",
        "sh" | "bash" | "zsh" => "Shell",
        "sql" => "SQL",

        // Web technologies
        "html" | "htm" => "HTML",
        "css" => "CSS",
        "scss" | "sass" => "SCSS",
        "vue" => "Vue",
        "svelte" => "Svelte",

        // Data formats and config files
        "json" => "JSON",
        "yaml" | "yml" => "YAML",
        "toml" => "TOML",
        "xml" => "XML",
        "ini" => "INI",
        "conf" | "config" | "cfg" => "Config",
        "properties" => "Properties",
        "env" => "Environment",

        // Documentation formats
        "md" | "markdown" => "Markdown",
        "rst" => "reStructuredText",
        "adoc" | "asciidoc" => "AsciiDoc",
        "org" => "Org Mode",
        "txt" => "Text",

        _ => return None,
    };

    Some(lang.to_string())
}

/// Detect the language of well-known extensionless file names
pub(crate) fn detect_from_file_name(name: &str) -> Option<&'static str> {
    match name {
        "Dockerfile" | "Containerfile" => Some("Dockerfile"),
        "Makefile" | "makefile" | "GNUmakefile" => Some("Makefile"),
        "Rakefile" | "Gemfile" => Some("Ruby"),
        "Jenkinsfile" => Some("Groovy"),
        _ => None,
    }
}

/// Detect the interpreter named on a `#!` line
fn detect_from_shebang(content: &str) -> Option<&'static str> {
    let first = content.lines().next()?.strip_prefix("#!")?;
    let mut words = first.split_whitespace();
    let program = words.next()?;
    let mut interpreter = program.rsplit('/').next()?;
    // `#!/usr/bin/env python3`
    if interpreter == "env" {
        interpreter = words.find(|w| !w.starts_with('-'))?;
    }

    let lang = if interpreter.starts_with("python") {
        "Python"
    } else if interpreter.starts_with("node") || interpreter == "deno" {
        "JavaScript"
    } else if matches!(interpreter, "sh" | "bash" | "zsh" | "dash" | "ksh") {
        "Shell"
    } else if interpreter.starts_with("ruby") {
        "Ruby"
    } else if interpreter.starts_with("php") {
        "PHP"
    } else {
        return None;
    };
    Some(lang)
}

/// Detect the language of a file, sniffing the name and first line when the
/// extension is unknown or missing. Never fails; unknown files are `Text`.
pub fn detect_language_for(path: &str, content: &str) -> String {
    let path = Path::new(path);
    if let Some(lang) = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(detect_language)
    {
        return lang;
    }

    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(detect_from_file_name)
        .or_else(|| detect_from_shebang(content))
        .unwrap_or(FALLBACK_LANGUAGE)
        .to_string()
}
