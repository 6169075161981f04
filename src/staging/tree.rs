//! Text rendering of a staged tree, for verbose output.

use std::fs;
use std::path::Path;

/// Render `root` as an indented tree, one line per entry.
///
/// Symlinks are shown with their target and are not descended into, except
/// for `root` itself. Unreadable directories are rendered as leaves.
pub fn render_tree(root: &Path) -> Vec<String> {
    let mut lines = vec![root.display().to_string()];
    render_children(root, "", &mut lines);
    lines
}

fn render_children(dir: &Path, indent: &str, lines: &mut Vec<String>) {
    let mut entries: Vec<_> = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(Result::ok).map(|e| e.path()).collect(),
        Err(_) => return,
    };
    entries.sort();

    let count = entries.len();
    for (i, path) in entries.into_iter().enumerate() {
        let last = i + 1 == count;
        let branch = if last { "└── " } else { "├── " };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match fs::read_link(&path) {
            Ok(target) => lines.push(format!("{}{}{} -> {}", indent, branch, name, target.display())),
            Err(_) if path.is_dir() => {
                lines.push(format!("{}{}{}/", indent, branch, name));
                let child_indent = format!("{}{}", indent, if last { "    " } else { "│   " });
                render_children(&path, &child_indent, lines);
            }
            Err(_) => lines.push(format!("{}{}{}", indent, branch, name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_tree() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("staged");
        fs::create_dir_all(root.join("keymaps/default")).unwrap();
        fs::write(root.join("keymaps/default/keymap.c"), "").unwrap();
        fs::write(root.join("rules.mk"), "").unwrap();
        std::os::unix::fs::symlink("/src/foo.c", root.join("abcd1234.c")).unwrap();

        let lines = render_tree(&root);
        assert_eq!(
            lines[1..],
            [
                "├── abcd1234.c -> /src/foo.c".to_string(),
                "├── keymaps/".to_string(),
                "│   └── default/".to_string(),
                "│       └── keymap.c".to_string(),
                "└── rules.mk".to_string(),
            ]
        );
    }
}
