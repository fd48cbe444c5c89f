//! Fixtures shared by the unit tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const FOUR_COLUMN_LOG: &str = "\
Start Time =\t10:00:00
Scan Rate =\t100
Channels =\t3
Resolution =\t1
Comment =\tbench
Time\ty0\ty1\ty2
0.000\t3.70\t0.50\t1.80
0.010\t3.69\t0.55\t1.81
0.020\t3.68\t0.60\t1.79
";

pub const THREE_COLUMN_LOG: &str = "\
Start Time =\t10:00:00
Scan Rate =\t100
Channels =\t2
Comment =\tbench
Time\ty0\ty1
0.000\t5.0\t1.0
0.010\t5.0\t2.0
";

/// Build a 3-column raw log from `(time, y0, y1)` rows.
pub fn three_column_log(rows: &[(f64, f64, f64)]) -> String {
    let mut out = String::from("Start Time =\t10:00:00\nScan Rate =\t100\nChannels =\t2\nComment =\tbench\nTime\ty0\ty1\n");
    for (t, y0, y1) in rows {
        out.push_str(&format!("{t:.6}\t{y0:.6}\t{y1:.6}\n"));
    }
    out
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Directory under the OS temp dir, removed on drop.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn new(name: &str) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "powertrace-{}-{}-{}",
            std::process::id(),
            name,
            id
        ));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("create scratch dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let file = self.path.join(name);
        fs::write(&file, contents).expect("write fixture");
        file
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
