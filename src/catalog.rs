//! Declarative catalog of editor tools.
//!
//! Each entry carries the MCP-facing name, description and input schema plus a
//! deterministic placeholder generator used while no editor is attached.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

pub type ToolArgs = Map<String, Value>;

const MOCK_NOTE: &str = "Connect Godot for real results.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    File,
    Scene,
    Script,
    Project,
    Visualization,
}

impl ToolCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Scene => "scene",
            Self::Script => "script",
            Self::Project => "project",
            Self::Visualization => "visualization",
        }
    }
}

/// `(name, json type, description)`
type Param = (&'static str, &'static str, &'static str);

#[derive(Clone)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub category: ToolCategory,
    params: &'static [Param],
    required: &'static [&'static str],
    mock: fn(&ToolArgs) -> Value,
}

impl ToolDef {
    pub fn input_schema(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        for (name, kind, description) in self.params {
            let mut schema = json!({
                "type": kind,
                "description": description,
            });
            if *kind == "array" {
                schema["items"] = json!({"type": "object"});
            }
            properties.insert((*name).to_owned(), schema);
        }
        let mut schema = Map::new();
        schema.insert("type".to_owned(), Value::String("object".to_owned()));
        schema.insert("properties".to_owned(), Value::Object(properties));
        if !self.required.is_empty() {
            schema.insert("required".to_owned(), json!(self.required));
        }
        schema
    }

    pub fn mock_response(&self, args: &ToolArgs) -> Value {
        (self.mock)(args)
    }

    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            name: self.name,
            category: self.category,
            description: self.description,
            input_schema: Value::Object(self.input_schema()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: &'static str,
    pub category: ToolCategory,
    pub description: &'static str,
    pub input_schema: Value,
}

#[derive(Clone)]
pub struct ToolCatalog {
    tools: Vec<ToolDef>,
    index: BTreeMap<&'static str, usize>,
}

impl ToolCatalog {
    pub fn builtin() -> Self {
        Self::from_defs(builtin_tools())
    }

    fn from_defs(tools: Vec<ToolDef>) -> Self {
        let index = tools
            .iter()
            .enumerate()
            .map(|(position, tool)| (tool.name, position))
            .collect();
        Self { tools, index }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.index.get(name).map(|position| &self.tools[*position])
    }

    /// Tools in registration order.
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|tool| tool.name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

fn mock_note(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("_mock".to_owned(), Value::Bool(true));
        map.insert("_note".to_owned(), Value::String(MOCK_NOTE.to_owned()));
    }
    value
}

fn mock_ok(message: &str) -> Value {
    mock_note(json!({"ok": true, "message": format!("Mock: {message}")}))
}

fn arg_str<'a>(args: &'a ToolArgs, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn arg_or_null(args: &ToolArgs, key: &str) -> Value {
    args.get(key).cloned().unwrap_or(Value::Null)
}

fn builtin_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "list_dir",
            description: "List files and folders under a Godot project path (e.g., res://).",
            category: ToolCategory::File,
            params: &[(
                "root",
                "string",
                "Starting path like res://addons/ai_assistant or res://",
            )],
            required: &["root"],
            mock: |args| {
                let root = match arg_str(args, "root") {
                    "" => "res://",
                    root => root,
                };
                mock_note(json!({
                    "path": root,
                    "files": ["project.godot", "icon.svg", "default_env.tres"],
                    "folders": ["scenes", "scripts", "assets", "addons"],
                }))
            },
        },
        ToolDef {
            name: "read_file",
            description: "Read a text file from the Godot project, optionally a specific line range.",
            category: ToolCategory::File,
            params: &[
                ("path", "string", "res:// path to the file (e.g., res://scripts/player.gd)"),
                ("start_line", "number", "1-based inclusive start line (optional)"),
                ("end_line", "number", "Inclusive end line; 0 or missing means end of file"),
            ],
            required: &["path"],
            mock: |args| {
                mock_note(json!({
                    "path": arg_or_null(args, "path"),
                    "content": "# Mock file content\nextends Node\n\nfunc _ready():\n    print(\"Hello from mock!\")",
                    "line_count": 5,
                }))
            },
        },
        ToolDef {
            name: "search_project",
            description: "Search the Godot project for a substring and return file hits with line numbers.",
            category: ToolCategory::File,
            params: &[
                ("query", "string", "Case-insensitive substring to find"),
                ("glob", "string", "Optional glob filter like **/*.gd"),
            ],
            required: &["query"],
            mock: |args| {
                let query = arg_str(args, "query");
                mock_note(json!({
                    "query": query,
                    "matches": [
                        {"file": "res://scripts/player.gd", "line": 10, "content": format!("    # Mock match for \"{query}\"")},
                        {"file": "res://scripts/enemy.gd", "line": 25, "content": format!("    # Another mock match for \"{query}\"")},
                    ],
                    "total_matches": 2,
                }))
            },
        },
        ToolDef {
            name: "create_script",
            description: "Create a NEW GDScript file (.gd). Use edit_script for changes to existing files.",
            category: ToolCategory::File,
            params: &[
                ("path", "string", "Script file path (res://scripts/player.gd), must not exist yet"),
                ("content", "string", "Full GDScript content to write to the file"),
            ],
            required: &["path", "content"],
            mock: |args| {
                mock_note(json!({
                    "success": true,
                    "path": arg_or_null(args, "path"),
                    "message": format!("Mock: Would create script at {}", arg_str(args, "path")),
                }))
            },
        },
        ToolDef {
            name: "create_scene",
            description: "Create a new Godot scene (.tscn) file with nodes.",
            category: ToolCategory::Scene,
            params: &[
                ("scene_path", "string", "Scene file path (e.g., res://scenes/player.tscn)"),
                ("root_node_name", "string", "Name of root node (default: derived from filename)"),
                ("root_node_type", "string", "Type of root node (e.g., Node2D, CharacterBody2D, Control)"),
                ("nodes", "array", "Child nodes to add. Each node: {name, type, properties, script, children}"),
                ("attach_script", "string", "Optional script path to attach to the root node"),
            ],
            required: &["scene_path", "root_node_type"],
            mock: |_| mock_ok("Scene would be created"),
        },
        ToolDef {
            name: "read_scene",
            description: "Read and parse a scene file to get its full node structure and properties.",
            category: ToolCategory::Scene,
            params: &[
                ("scene_path", "string", "Path to the scene file (res://path/to/scene.tscn)"),
                ("include_properties", "boolean", "Include node properties in the output"),
            ],
            required: &["scene_path"],
            mock: |args| {
                mock_note(json!({
                    "ok": true,
                    "scene_path": arg_or_null(args, "scene_path"),
                    "root": {
                        "name": "Root",
                        "type": "Node2D",
                        "children": [{"name": "Sprite2D", "type": "Sprite2D"}],
                    },
                }))
            },
        },
        ToolDef {
            name: "add_node",
            description: "Add a single node to an existing scene file.",
            category: ToolCategory::Scene,
            params: &[
                ("scene_path", "string", "Path to the scene file"),
                ("node_name", "string", "Name for the new node"),
                ("node_type", "string", "Type of node (e.g., Sprite2D, Camera2D)"),
                ("parent_path", "string", "Path to parent node (. for root)"),
                ("properties", "object", "Optional properties to set on the node"),
            ],
            required: &["scene_path", "node_name", "node_type"],
            mock: |args| {
                mock_note(json!({
                    "ok": true,
                    "message": format!(
                        "Mock: Would add {} named {}",
                        arg_str(args, "node_type"),
                        arg_str(args, "node_name")
                    ),
                }))
            },
        },
        ToolDef {
            name: "remove_node",
            description: "Remove a node from an existing scene file.",
            category: ToolCategory::Scene,
            params: &[
                ("scene_path", "string", "Path to the scene file"),
                ("node_path", "string", "Path to the node to remove (cannot be root)"),
            ],
            required: &["scene_path", "node_path"],
            mock: |args| {
                mock_note(json!({
                    "ok": true,
                    "message": format!("Mock: Would remove node at {}", arg_str(args, "node_path")),
                }))
            },
        },
        ToolDef {
            name: "modify_node_property",
            description: "Set a property on a node in an existing scene file.",
            category: ToolCategory::Scene,
            params: &[
                ("scene_path", "string", "Path to the scene file"),
                ("node_path", "string", "Path to the node (. for root)"),
                ("property_name", "string", "Property to set (e.g., position, modulate)"),
                ("value", "string", "New value, in Godot literal syntax"),
            ],
            required: &["scene_path", "node_path", "property_name", "value"],
            mock: |_| mock_ok("Property would be modified"),
        },
        ToolDef {
            name: "edit_script",
            description: "Apply a small, surgical code edit (1-10 lines) to a GDScript file.",
            category: ToolCategory::Script,
            params: &[(
                "edit",
                "object",
                "Edit object: {type: \"snippet_replace\", file, old_snippet, new_snippet, context_before, context_after}",
            )],
            required: &["edit"],
            mock: |_| mock_ok("Diff would be applied"),
        },
        ToolDef {
            name: "validate_script",
            description: "Validate a GDScript file for syntax errors using Godot's built-in parser.",
            category: ToolCategory::Script,
            params: &[("path", "string", "Path to the GDScript file to validate")],
            required: &["path"],
            mock: |args| {
                mock_note(json!({
                    "ok": true,
                    "path": arg_or_null(args, "path"),
                    "valid": true,
                    "errors": [],
                }))
            },
        },
        ToolDef {
            name: "list_scripts",
            description: "List all GDScript files in the project with their class names and base types.",
            category: ToolCategory::Script,
            params: &[("root", "string", "Root folder to scan (default: res://)")],
            required: &[],
            mock: |_| {
                mock_note(json!({
                    "ok": true,
                    "scripts": [
                        {"path": "res://scripts/player.gd", "class_name": "Player", "extends": "CharacterBody2D"},
                        {"path": "res://scripts/enemy.gd", "class_name": "Enemy", "extends": "CharacterBody2D"},
                    ],
                    "count": 2,
                }))
            },
        },
        ToolDef {
            name: "get_project_settings",
            description: "Concise project settings summary: main scene, window size, physics tick rate.",
            category: ToolCategory::Project,
            params: &[
                ("include_render", "boolean", "Include render settings"),
                ("include_physics", "boolean", "Include physics settings"),
            ],
            required: &[],
            mock: |_| {
                mock_note(json!({
                    "ok": true,
                    "settings": {
                        "main_scene": "res://scenes/main.tscn",
                        "window": {"width": 1152, "height": 648},
                    },
                }))
            },
        },
        ToolDef {
            name: "get_input_map",
            description: "Return the InputMap: action names mapped to events.",
            category: ToolCategory::Project,
            params: &[(
                "include_deadzones",
                "boolean",
                "Include axis values and deadzones for joypad motion",
            )],
            required: &[],
            mock: |_| {
                mock_note(json!({
                    "ok": true,
                    "actions": {
                        "ui_accept": ["Enter", "Space"],
                        "ui_cancel": ["Escape"],
                        "move_left": ["A", "Left"],
                    },
                }))
            },
        },
        ToolDef {
            name: "get_console_log",
            description: "Return the latest lines from the Godot editor output log.",
            category: ToolCategory::Project,
            params: &[("max_lines", "number", "Maximum number of lines (default: 50)")],
            required: &[],
            mock: |_| {
                mock_note(json!({
                    "ok": true,
                    "lines": ["[Godot] Project loaded", "[Godot] Scene ready"],
                }))
            },
        },
        ToolDef {
            name: "get_errors",
            description: "Get errors and warnings from the Godot editor log, most recent first.",
            category: ToolCategory::Project,
            params: &[
                ("max_errors", "number", "Maximum number of errors to return (default: 50)"),
                ("include_warnings", "boolean", "Include warnings as well as errors"),
            ],
            required: &[],
            mock: |_| mock_note(json!({"ok": true, "errors": [], "count": 0})),
        },
        ToolDef {
            name: "open_in_godot",
            description: "Open a file in the Godot editor at a specific line.",
            category: ToolCategory::Project,
            params: &[
                ("path", "string", "res:// path to open"),
                ("line", "number", "1-based line number"),
            ],
            required: &["path"],
            mock: |args| {
                mock_note(json!({
                    "ok": true,
                    "message": format!("Mock: Would open {}", arg_str(args, "path")),
                }))
            },
        },
        ToolDef {
            name: "scene_tree_dump",
            description: "Dump the scene tree of the scene currently open in the editor.",
            category: ToolCategory::Project,
            params: &[],
            required: &[],
            mock: |_| {
                mock_note(json!({
                    "ok": true,
                    "tree": "Root (Node2D)\n  Player (CharacterBody2D)\n    Sprite2D\n    CollisionShape2D",
                }))
            },
        },
        ToolDef {
            name: "map_project",
            description: "Crawl the project and build an interactive visual map of all scripts and their connections. Opens a browser-based visualization.",
            category: ToolCategory::Visualization,
            params: &[
                ("root", "string", "Root path to start crawling from (default: res://)"),
                ("include_addons", "boolean", "Include scripts under addons/ (default: false)"),
            ],
            required: &[],
            mock: |_| mock_note(mock_project_map()),
        },
    ]
}

fn mock_project_map() -> Value {
    json!({
        "project_map": {
            "nodes": [
                {
                    "path": "res://scripts/player.gd",
                    "filename": "player.gd",
                    "folder": "res://scripts",
                    "class_name": "Player",
                    "extends": "CharacterBody2D",
                    "description": "Handles player movement and input",
                    "line_count": 85,
                    "variables": [{"name": "speed", "exported": true}, {"name": "jump_force", "exported": true}],
                    "functions": [{"name": "_ready", "params": ""}, {"name": "_physics_process", "params": "delta: float"}],
                    "signals": ["health_changed", "died"],
                    "preloads": ["res://scenes/bullet.tscn"],
                    "connections": [],
                },
                {
                    "path": "res://scripts/enemy.gd",
                    "filename": "enemy.gd",
                    "folder": "res://scripts",
                    "class_name": "Enemy",
                    "extends": "CharacterBody2D",
                    "description": "Base enemy AI with patrol and chase behavior",
                    "line_count": 120,
                    "variables": [{"name": "patrol_speed", "exported": true}],
                    "functions": [{"name": "_ready", "params": ""}, {"name": "_physics_process", "params": "delta: float"}],
                    "signals": ["enemy_defeated"],
                    "preloads": [],
                    "connections": [{"signal": "body_entered", "line": 15}],
                },
            ],
            "edges": [
                {"from": "res://scripts/player.gd", "to": "res://scenes/bullet.tscn", "type": "preload"},
            ],
            "total_scripts": 2,
            "total_connections": 1,
        },
        "message": "Mock project map generated. Connect Godot for real data.",
    })
}
