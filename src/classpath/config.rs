/* Session configuration: the opcode profile and where classpath entries come from */

use rangemap::RangeInclusiveMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_API_LEVEL: i32 = 33;
pub const NO_ART_VERSION: i32 = -1;

/// Instruction-set profile shared by every container parse in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Opcodes {
    pub api_level: i32,
    pub art_version: i32,
}

impl Default for Opcodes {
    fn default() -> Self {
        Opcodes::for_api(DEFAULT_API_LEVEL)
    }
}

impl Opcodes {
    pub fn for_api(api_level: i32) -> Self {
        Opcodes { api_level, art_version: NO_ART_VERSION }
    }

    /// Profile for an oat file of the given version.
    pub fn for_art_version(art_version: i32) -> Self {
        Opcodes { api_level: art_version_to_api(art_version), art_version }
    }

    pub fn is_art(&self) -> bool {
        self.art_version != NO_ART_VERSION
    }

    /// Highest dex format version this API level can load.
    pub fn max_dex_version(&self) -> u32 {
        let mut map: RangeInclusiveMap<i32, u32> = RangeInclusiveMap::new();
        map.insert(i32::MIN..=23, 35);
        map.insert(24..=25, 37);
        map.insert(26..=27, 38);
        map.insert(28..=29, 39);
        map.insert(30..=i32::MAX, 41);
        map.get(&self.api_level).copied().unwrap_or(35)
    }

    pub fn supports_dex_version(&self, version: u32) -> bool {
        version <= self.max_dex_version()
    }
}

fn art_version_to_api(art_version: i32) -> i32 {
    let mut map: RangeInclusiveMap<i32, i32> = RangeInclusiveMap::new();
    map.insert(i32::MIN..=38, 19);
    map.insert(39..=44, 21);
    map.insert(45..=63, 22);
    map.insert(64..=78, 23);
    map.insert(79..=123, 24);
    map.insert(124..=130, 26);
    map.insert(131..=137, 27);
    map.insert(138..=169, 28);
    map.insert(170..=182, 29);
    map.insert(183..=i32::MAX, 30);
    map.get(&art_version).copied().unwrap_or(DEFAULT_API_LEVEL)
}

/// Everything a resolution session needs besides the file opener.
///
/// Loads from any serde format; missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassPathConfig {
    pub opcodes: Opcodes,
    /// Local directories searched for device paths such as `/system/framework/core.jar`.
    pub boot_class_path_dirs: Vec<PathBuf>,
    /// Explicit boot classpath. `None` means "derive from the input or the API level".
    pub boot_class_path: Option<Vec<String>>,
    /// Additional entries, each a full local path.
    pub extra_class_path: Vec<PathBuf>,
    /// The file whose classes are being analysed, loaded last.
    pub input: Option<PathBuf>,
    pub check_oat_dependencies: bool,
}

impl Default for ClassPathConfig {
    fn default() -> Self {
        ClassPathConfig {
            opcodes: Opcodes::default(),
            boot_class_path_dirs: vec![],
            boot_class_path: None,
            extra_class_path: vec![],
            input: None,
            check_oat_dependencies: true,
        }
    }
}

const FRAMEWORK_DIR: &str = "/system/framework";

/// The boot classpath a stock device of the given API level ships with.
pub fn default_boot_class_path(api_level: i32) -> Vec<String> {
    let mut table: RangeInclusiveMap<i32, &'static [&'static str]> = RangeInclusiveMap::new();
    table.insert(i32::MIN..=8, &[
        "core.jar", "ext.jar", "framework.jar", "android.policy.jar", "services.jar",
    ]);
    table.insert(9..=11, &[
        "core.jar", "bouncycastle.jar", "ext.jar", "framework.jar", "android.policy.jar",
        "services.jar", "core-junit.jar",
    ]);
    table.insert(12..=13, &[
        "core.jar", "apache-xml.jar", "bouncycastle.jar", "ext.jar", "framework.jar",
        "android.policy.jar", "services.jar", "core-junit.jar",
    ]);
    table.insert(14..=17, &[
        "core.jar", "core-junit.jar", "bouncycastle.jar", "ext.jar", "framework.jar",
        "telephony-common.jar", "mms-common.jar", "android.policy.jar", "services.jar",
        "apache-xml.jar",
    ]);
    table.insert(18..=18, &[
        "core.jar", "core-junit.jar", "bouncycastle.jar", "ext.jar", "framework.jar",
        "telephony-common.jar", "voip-common.jar", "mms-common.jar", "android.policy.jar",
        "services.jar", "apache-xml.jar",
    ]);
    table.insert(19..=19, &[
        "core.jar", "conscrypt.jar", "core-junit.jar", "bouncycastle.jar", "ext.jar",
        "framework.jar", "framework2.jar", "telephony-common.jar", "voip-common.jar",
        "mms-common.jar", "android.policy.jar", "services.jar", "apache-xml.jar",
        "webviewchromium.jar",
    ]);
    table.insert(20..=22, &[
        "core-libart.jar", "conscrypt.jar", "okhttp.jar", "core-junit.jar", "bouncycastle.jar",
        "ext.jar", "framework.jar", "telephony-common.jar", "voip-common.jar", "ims-common.jar",
        "mms-common.jar", "android.policy.jar", "apache-xml.jar",
    ]);
    table.insert(23..=23, &[
        "core-libart.jar", "conscrypt.jar", "okhttp.jar", "core-junit.jar", "bouncycastle.jar",
        "ext.jar", "framework.jar", "telephony-common.jar", "voip-common.jar", "ims-common.jar",
        "apache-xml.jar", "org.apache.http.legacy.boot.jar",
    ]);
    table.insert(24..=i32::MAX, &[
        "core-oj.jar", "core-libart.jar", "conscrypt.jar", "okhttp.jar", "core-junit.jar",
        "bouncycastle.jar", "ext.jar", "framework.jar", "telephony-common.jar",
        "voip-common.jar", "ims-common.jar", "apache-xml.jar",
        "org.apache.http.legacy.boot.jar",
    ]);

    table
        .get(&api_level)
        .map(|jars| jars.iter().map(|jar| format!("{}/{}", FRAMEWORK_DIR, jar)).collect())
        .unwrap_or_default()
}
