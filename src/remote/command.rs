//! Typed remote commands and their shell rendering

use crate::core::StaticHostEntry;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

const APT_ENV: &str = "DEBIAN_FRONTEND=noninteractive";
const SYSCTL_CONF: &str = "/etc/sysctl.conf";
const FIREWALL_RULES: &str = "/etc/iptables/rules.v4";
const DPKG_LOCKS: &str = "/var/lib/dpkg/lock-frontend /var/lib/dpkg/lock /var/lib/apt/lists/lock";

/// A single action run on a remote node.
///
/// Sessions receive these values rather than shell text, so test doubles can
/// match on variants. Removal-style commands succeed when there is nothing to
/// remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Print the OS release version
    OsRelease,
    /// Print `locked` while the package manager is busy, else `free`
    PackageLockStatus,
    /// Print the dpkg status triple of a package
    PackageStatus { package: String },
    PackageInstall { package: String },
    /// Finish interrupted installs and fix broken dependencies
    PackageRepair { package: String },
    PackagePurge { package: String },
    EnableIpForwarding,
    DisableIpForwarding,
    /// Turn off the distribution's host firewall front-end
    DisableHostFirewall,
    /// Accept tcp and udp traffic to a local port
    AllowPort { port: u16 },
    /// Masquerade traffic leaving the default interface
    Masquerade,
    /// DNAT tcp and udp on `port` to the same port on `destination`
    ForwardPort { port: u16, destination: String },
    /// Accept loopback, established traffic and `ports`; drop everything else
    LockDownFirewall { ports: Vec<u16> },
    PersistFirewall,
    /// Flush all rules and restore accepting default policies
    ResetFirewall,
    ReloadUnits,
    ServiceEnable { unit: String },
    ServiceRestart { unit: String },
    /// Stop and disable a unit; absent units are fine
    ServiceStop { unit: String },
    ComposeUp { file: String },
    ComposeRestart { file: String },
    /// Stop a compose project if its file exists
    ComposeDown { file: String },
    WriteFile { path: String, contents: String, mode: u32 },
    MakeDir { path: String },
    RemovePath { path: String },
    /// Copy the hosts file aside unless a backup already exists
    BackupHosts { path: String, backup: String },
    /// Append tagged entries that are not already present
    AppendHosts {
        path: String,
        entries: Vec<StaticHostEntry>,
        tag: String,
    },
    /// Put the backup back, or strip tagged lines when there is none
    RestoreHosts { path: String, backup: String, tag: String },
    /// List listening tcp and udp sockets
    ListeningSockets,
    ClearShellHistory,
    /// Empty temp directories and truncate log files
    ClearTraces,
}

impl RemoteCommand {
    /// Short stable name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCommand::OsRelease => "os-release",
            RemoteCommand::PackageLockStatus => "package-lock-status",
            RemoteCommand::PackageStatus { .. } => "package-status",
            RemoteCommand::PackageInstall { .. } => "package-install",
            RemoteCommand::PackageRepair { .. } => "package-repair",
            RemoteCommand::PackagePurge { .. } => "package-purge",
            RemoteCommand::EnableIpForwarding => "enable-ip-forwarding",
            RemoteCommand::DisableIpForwarding => "disable-ip-forwarding",
            RemoteCommand::DisableHostFirewall => "disable-host-firewall",
            RemoteCommand::AllowPort { .. } => "allow-port",
            RemoteCommand::Masquerade => "masquerade",
            RemoteCommand::ForwardPort { .. } => "forward-port",
            RemoteCommand::LockDownFirewall { .. } => "lock-down-firewall",
            RemoteCommand::PersistFirewall => "persist-firewall",
            RemoteCommand::ResetFirewall => "reset-firewall",
            RemoteCommand::ReloadUnits => "reload-units",
            RemoteCommand::ServiceEnable { .. } => "service-enable",
            RemoteCommand::ServiceRestart { .. } => "service-restart",
            RemoteCommand::ServiceStop { .. } => "service-stop",
            RemoteCommand::ComposeUp { .. } => "compose-up",
            RemoteCommand::ComposeRestart { .. } => "compose-restart",
            RemoteCommand::ComposeDown { .. } => "compose-down",
            RemoteCommand::WriteFile { .. } => "write-file",
            RemoteCommand::MakeDir { .. } => "make-dir",
            RemoteCommand::RemovePath { .. } => "remove-path",
            RemoteCommand::BackupHosts { .. } => "backup-hosts",
            RemoteCommand::AppendHosts { .. } => "append-hosts",
            RemoteCommand::RestoreHosts { .. } => "restore-hosts",
            RemoteCommand::ListeningSockets => "listening-sockets",
            RemoteCommand::ClearShellHistory => "clear-shell-history",
            RemoteCommand::ClearTraces => "clear-traces",
        }
    }

    /// Render the command as POSIX shell text for the remote login shell
    pub fn render(&self) -> String {
        match self {
            RemoteCommand::OsRelease => {
                r#"lsb_release -rs 2>/dev/null || (. /etc/os-release && echo "$VERSION_ID")"#
                    .to_string()
            }
            RemoteCommand::PackageLockStatus => format!(
                "if fuser {} >/dev/null 2>&1; then echo locked; else echo free; fi",
                DPKG_LOCKS
            ),
            RemoteCommand::PackageStatus { package } => format!(
                "dpkg-query -W -f='${{Status}}' {} 2>/dev/null || true",
                quote(package)
            ),
            RemoteCommand::PackageInstall { package } => format!(
                "{env} apt-get update -qq && {env} apt-get install -y -qq {}",
                quote(package),
                env = APT_ENV
            ),
            RemoteCommand::PackageRepair { package } => format!(
                "{env} dpkg --configure -a && {env} apt-get install -f -y -qq && {env} apt-get install --reinstall -y -qq {}",
                quote(package),
                env = APT_ENV
            ),
            RemoteCommand::PackagePurge { package } => format!(
                "if dpkg-query -W {pkg} >/dev/null 2>&1; then {env} apt-get purge -y -qq {pkg}; fi",
                pkg = quote(package),
                env = APT_ENV
            ),
            RemoteCommand::EnableIpForwarding => sysctl_forwarding(1),
            RemoteCommand::DisableIpForwarding => sysctl_forwarding(0),
            RemoteCommand::DisableHostFirewall => {
                "ufw disable >/dev/null 2>&1 || true".to_string()
            }
            RemoteCommand::AllowPort { port } => ["tcp", "udp"]
                .iter()
                .map(|proto| {
                    ensure_rule(
                        "filter",
                        "INPUT",
                        &format!("-p {} --dport {} -j ACCEPT", proto, port),
                        RulePosition::Top,
                    )
                })
                .collect::<Vec<_>>()
                .join(" && "),
            RemoteCommand::Masquerade => format!(
                r#"IFACE=$(ip route show default | awk '{{print $5; exit}}') && [ -n "$IFACE" ] && {}"#,
                ensure_rule("nat", "POSTROUTING", r#"-o "$IFACE" -j MASQUERADE"#, RulePosition::Bottom)
            ),
            RemoteCommand::ForwardPort { port, destination } => {
                let target = if destination.contains(':') {
                    format!("[{}]:{}", destination, port)
                } else {
                    format!("{}:{}", destination, port)
                };
                let mut rules = Vec::new();
                for proto in ["tcp", "udp"] {
                    rules.push(ensure_rule(
                        "nat",
                        "PREROUTING",
                        &format!(
                            "-p {} --dport {} -j DNAT --to-destination {}",
                            proto,
                            port,
                            quote(&target)
                        ),
                        RulePosition::Bottom,
                    ));
                    rules.push(ensure_rule(
                        "filter",
                        "FORWARD",
                        &format!(
                            "-p {} -d {} --dport {} -j ACCEPT",
                            proto,
                            quote(destination),
                            port
                        ),
                        RulePosition::Top,
                    ));
                }
                rules.join(" && ")
            }
            RemoteCommand::LockDownFirewall { ports } => {
                let mut rules = vec![
                    ensure_rule("filter", "INPUT", "-i lo -j ACCEPT", RulePosition::Top),
                    ensure_rule(
                        "filter",
                        "INPUT",
                        "-m conntrack --ctstate ESTABLISHED,RELATED -j ACCEPT",
                        RulePosition::Top,
                    ),
                ];
                for port in ports {
                    for proto in ["tcp", "udp"] {
                        rules.push(ensure_rule(
                            "filter",
                            "INPUT",
                            &format!("-p {} --dport {} -j ACCEPT", proto, port),
                            RulePosition::Top,
                        ));
                    }
                }
                rules.push("iptables -P INPUT DROP".to_string());
                rules.join(" && ")
            }
            RemoteCommand::PersistFirewall => format!(
                "mkdir -p /etc/iptables && iptables-save > {}",
                FIREWALL_RULES
            ),
            RemoteCommand::ResetFirewall => [
                "iptables -P INPUT ACCEPT",
                "iptables -P FORWARD ACCEPT",
                "iptables -P OUTPUT ACCEPT",
                "iptables -F",
                "iptables -X",
                "iptables -t nat -F",
                "iptables -t nat -X",
            ]
            .join(" && "),
            RemoteCommand::ReloadUnits => "systemctl daemon-reload".to_string(),
            RemoteCommand::ServiceEnable { unit } => {
                format!("systemctl enable --now {}", quote(unit))
            }
            RemoteCommand::ServiceRestart { unit } => {
                format!("systemctl restart {}", quote(unit))
            }
            RemoteCommand::ServiceStop { unit } => format!(
                "systemctl disable --now {} >/dev/null 2>&1 || true",
                quote(unit)
            ),
            RemoteCommand::ComposeUp { file } => {
                format!("docker-compose -f {} up -d", quote(file))
            }
            RemoteCommand::ComposeRestart { file } => {
                format!("docker-compose -f {} restart", quote(file))
            }
            RemoteCommand::ComposeDown { file } => format!(
                "if [ -f {f} ]; then docker-compose -f {f} down --remove-orphans; fi",
                f = quote(file)
            ),
            RemoteCommand::WriteFile { path, contents, mode } => format!(
                "printf '%s' {} | base64 -d > {p} && chmod {:o} {p}",
                quote(&STANDARD.encode(contents)),
                mode,
                p = quote(path)
            ),
            RemoteCommand::MakeDir { path } => format!("mkdir -p {}", quote(path)),
            RemoteCommand::RemovePath { path } => format!("rm -rf {}", quote(path)),
            RemoteCommand::BackupHosts { path, backup } => format!(
                "[ -f {b} ] || cp -p {p} {b}",
                p = quote(path),
                b = quote(backup)
            ),
            RemoteCommand::AppendHosts { path, entries, tag } => {
                if entries.is_empty() {
                    return "true".to_string();
                }
                entries
                    .iter()
                    .map(|entry| {
                        let line = quote(&hosts_line(entry, tag));
                        format!(
                            "{{ grep -qxF {line} {p} || printf '%s\\n' {line} >> {p}; }}",
                            line = line,
                            p = quote(path)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" && ")
            }
            RemoteCommand::RestoreHosts { path, backup, tag } => format!(
                "if [ -f {b} ]; then cp -p {b} {p} && rm -f {b}; else sed -i {pattern} {p}; fi",
                p = quote(path),
                b = quote(backup),
                pattern = quote(&format!("/ # {}$/d", tag))
            ),
            RemoteCommand::ListeningSockets => "ss -tuln".to_string(),
            RemoteCommand::ClearShellHistory => {
                "history -c 2>/dev/null; : > ~/.bash_history".to_string()
            }
            RemoteCommand::ClearTraces => {
                "rm -rf /tmp/* /var/tmp/* && find /var/log -type f -exec truncate -s 0 {} +"
                    .to_string()
            }
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A hosts-file line as written by this tool
pub fn hosts_line(entry: &StaticHostEntry, tag: &str) -> String {
    format!("{} {} # {}", entry.address, entry.hostname, tag)
}

/// Single-quote a value for the POSIX shell
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

enum RulePosition {
    Top,
    Bottom,
}

/// Add an iptables rule only if an identical one is not present
fn ensure_rule(table: &str, chain: &str, rule: &str, position: RulePosition) -> String {
    let add = match position {
        RulePosition::Top => "-I",
        RulePosition::Bottom => "-A",
    };
    format!(
        "{{ iptables -t {t} -C {c} {r} 2>/dev/null || iptables -t {t} {add} {c} {r}; }}",
        t = table,
        c = chain,
        r = rule,
        add = add
    )
}

fn sysctl_forwarding(value: u8) -> String {
    format!(
        "sysctl -w net.ipv4.ip_forward={v} && sed -i '/^net.ipv4.ip_forward/d' {conf} && echo 'net.ipv4.ip_forward={v}' >> {conf}",
        v = value,
        conf = SYSCTL_CONF
    )
}

/// Installation state reported by the package database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    Installed,
    /// Half-installed or half-configured
    Broken,
    NotInstalled,
}

impl PackageState {
    /// Interpret a dpkg `want flag status` triple; empty output means absent
    pub fn parse(output: &str) -> Self {
        let words: Vec<&str> = output.split_whitespace().collect();
        match words.as_slice() {
            [] => PackageState::NotInstalled,
            [_, "ok", "installed"] => PackageState::Installed,
            [_, _, "not-installed"] | [_, _, "config-files"] => PackageState::NotInstalled,
            _ => PackageState::Broken,
        }
    }
}

/// Whether the lock check reported a busy package manager
pub fn is_locked(output: &str) -> bool {
    output.trim() == "locked"
}

/// Whether socket listing output shows something bound to `port`
pub fn is_listening(output: &str, port: u16) -> bool {
    let suffix = format!(":{}", port);
    output
        .split_whitespace()
        .any(|token| token.ends_with(&suffix))
}
