//! Builtin stub snapshot
//!
//! A small typeshed-equivalent: declaration-only stubs for the builtin
//! surface model documents commonly attach to. Seeded into every
//! environment under a reserved external root, and written into the cache
//! directory as the persisted stub snapshot.

use crate::shared::models::SearchRoot;
use std::path::{Path, PathBuf};

/// Reserved root the prelude stubs live under
pub const PRELUDE_ROOT: &str = "/__taintflow_prelude__";

/// Priority well past any user root; stub shadowing still applies
pub const PRELUDE_PRIORITY: u32 = u32::MAX;

const BUILTINS_PYI: &str = "\
def eval(source, globals = ..., locals = ...): ...
def exec(source, globals = ..., locals = ...): ...
def compile(source, filename, mode): ...
def open(file, mode = ..., buffering = ...): ...
def input(prompt = ...): ...
def print(*values): ...
def getattr(obj, name, default = ...): ...
def setattr(obj, name, value): ...
";

const OS_PYI: &str = "\
environ = ...
def system(command): ...
def popen(cmd, mode = ..., buffering = ...): ...
def getenv(key, default = ...): ...
def remove(path): ...
";

const SUBPROCESS_PYI: &str = "\
def call(args, shell = ...): ...
def run(args, shell = ..., capture_output = ...): ...
def check_output(args, shell = ...): ...
def Popen(args, shell = ...): ...
";

const PICKLE_PYI: &str = "\
def load(file): ...
def loads(data): ...
def dump(obj, file): ...
def dumps(obj): ...
";

const TYPING_PYI: &str = "\
Any = ...
Optional = ...
Awaitable = ...
Union = ...
List = ...
Dict = ...
Set = ...
Tuple = ...
Callable = ...
def override(func): ...
";

const SYS_PYI: &str = "\
argv = ...
stdin = ...
def exit(code = ...): ...
";

fn stub_files() -> [(&'static str, &'static str); 6] {
    [
        ("builtins.pyi", BUILTINS_PYI),
        ("os.pyi", OS_PYI),
        ("subprocess.pyi", SUBPROCESS_PYI),
        ("pickle.pyi", PICKLE_PYI),
        ("typing.pyi", TYPING_PYI),
        ("sys.pyi", SYS_PYI),
    ]
}

/// The prelude's search root
pub fn prelude_root() -> SearchRoot {
    SearchRoot::external(PRELUDE_ROOT, PRELUDE_PRIORITY)
}

/// `(path, content)` pairs to seed into a source environment
pub fn prelude_sources() -> Vec<(PathBuf, String)> {
    stub_files()
        .into_iter()
        .map(|(name, content)| {
            (
                PathBuf::from(PRELUDE_ROOT).join(name),
                content.to_string(),
            )
        })
        .collect()
}

/// Write the stub snapshot into the cache directory
pub fn write_snapshot(cache_dir: &Path) -> std::io::Result<()> {
    let stub_dir = cache_dir.join("stubs");
    std::fs::create_dir_all(&stub_dir)?;
    for (name, content) in stub_files() {
        std::fs::write(stub_dir.join(name), content)?;
    }
    Ok(())
}
