/// Candidate commands per information category, most specific first.
pub const CATEGORIES: &[(&str, &[&str])] = &[
    ("os_release", &["cat /etc/os-release", "lsb_release -a", "sw_vers", "uname -s"]),
    ("hostname", &["hostname", "cat /etc/hostname", "uname -n"]),
    ("uptime", &["uptime -p", "uptime", "cat /proc/uptime"]),
    ("memory", &["free -m", "cat /proc/meminfo", "vm_stat"]),
    ("cpu", &["nproc", "lscpu", "sysctl -n hw.ncpu"]),
    ("kernel", &["uname -r", "cat /proc/version"]),
    ("architecture", &["uname -m", "arch"]),
    ("disk", &["df -P /", "df -h /"]),
    ("network", &["ip -o -4 addr show", "ifconfig -a"]),
    (
        "services",
        &[
            "systemctl list-units --type=service --state=running --no-pager --no-legend",
            "service --status-all",
            "rc-status",
        ],
    ),
    (
        "packages",
        &[
            "dpkg -l | grep -c '^ii'",
            "rpm -qa | wc -l",
            "pacman -Q | wc -l",
            "apk info | wc -l",
        ],
    ),
    ("load", &["cat /proc/loadavg", "uptime"]),
    ("users", &["who", "w -h"]),
    ("environment", &["systemd-detect-virt", "cat /proc/1/cgroup"]),
];

/// Package managers in priority order: (name, existence check, update count).
pub const PACKAGE_MANAGERS: &[(&str, &str, &str)] = &[
    ("apt", "command -v apt-get", "apt list --upgradable 2>/dev/null | grep -c upgradable || true"),
    ("yum", "command -v yum", "yum -q check-update 2>/dev/null | grep -c '^[a-zA-Z0-9]' || true"),
    ("dnf", "command -v dnf", "dnf -q check-update 2>/dev/null | grep -c '^[a-zA-Z0-9]' || true"),
    ("zypper", "command -v zypper", "zypper -q list-updates 2>/dev/null | grep -c '^v ' || true"),
    ("pacman", "command -v pacman", "checkupdates 2>/dev/null | wc -l"),
    ("apk", "command -v apk", "apk version -l '<' 2>/dev/null | tail -n +2 | wc -l"),
];

pub const APT_UPGRADABLE_LISTING: &str = "apt list --upgradable 2>/dev/null";
