/*!
Fixtures de sorties shell réalistes

Scripte un `MockShell` avec les sorties exactes attendues par les collecteurs:
`docker ps` / `docker inspect`, `virsh`, `ip`, commandes de discovery, tmux.
*/

use crate::mock_shell::MockShell;
use netkeep_kernel::inventory::{containers, interfaces, vms};

/// Un container tel que docker le rapporterait.
#[derive(Debug, Clone)]
pub struct ContainerFixture {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub ports: String,
    pub network: String,
    /// Runtime address, emptied by docker once the container stops
    pub ip: Option<String>,
    /// Static address from `IPAMConfig`
    pub ipam_ip: Option<String>,
    pub gateway: Option<String>,
    pub prefix_len: u8,
    pub mac: Option<String>,
    pub network_mode: String,
    pub labels_json: String,
}

impl ContainerFixture {
    /// Container en marche sur un réseau macvlan `lan` en /24.
    pub fn running(id: &str, name: &str, ip: &str, mac: &str) -> Self {
        let gateway = ip.rsplit_once('.').map(|(net, _)| format!("{net}.1"));
        Self {
            id: id.to_string(),
            name: name.to_string(),
            image: format!("{name}:latest"),
            status: "Up 2 hours".to_string(),
            ports: String::new(),
            network: "lan".to_string(),
            ip: Some(ip.to_string()),
            ipam_ip: Some(ip.to_string()),
            gateway,
            prefix_len: 24,
            mac: Some(mac.to_string()),
            network_mode: "lan".to_string(),
            labels_json: "{}".to_string(),
        }
    }

    /// Arrêté: docker vide l'IP, la passerelle et la MAC runtime, seule l'adresse IPAM reste.
    pub fn stopped(mut self) -> Self {
        self.status = "Exited (0) 3 hours ago".to_string();
        self.ip = None;
        self.gateway = None;
        self.mac = None;
        self.prefix_len = 0;
        self
    }

    /// Address printed by the inspect templates (runtime, else IPAM).
    fn shown_ip(&self) -> Option<&str> {
        self.ip.as_deref().or(self.ipam_ip.as_deref())
    }

    pub fn on_bridge(mut self) -> Self {
        self.network = "bridge".to_string();
        self.network_mode = "bridge".to_string();
        self
    }

    pub fn ports(mut self, ports: &str) -> Self {
        self.ports = ports.to_string();
        self
    }

    pub fn labels(mut self, json: &str) -> Self {
        self.labels_json = json.to_string();
        self
    }

    fn listing_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|2024-05-01 10:00:00 +0000 UTC",
            self.id, self.name, self.image, self.status, self.ports
        )
    }

    fn network_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.network,
            self.shown_ip().unwrap_or(""),
            self.gateway.as_deref().unwrap_or(""),
            self.mac.as_deref().unwrap_or(""),
            self.prefix_len
        )
    }

    fn lookup_line(&self) -> String {
        let state = if self.status.starts_with("Up") { "running" } else { "exited" };
        let addresses = match self.shown_ip() {
            Some(ip) => format!("{},{} ", ip, self.mac.as_deref().unwrap_or("")),
            None => String::new(),
        };
        format!("{}|/{}|{}|{}", self.id, self.name, state, addresses)
    }
}

/// Scripte les sorties d'un host donné.
pub struct ShellFixtures<'a> {
    shell: &'a MockShell,
    host_id: String,
}

impl MockShell {
    pub fn host(&self, host_id: &str) -> ShellFixtures<'_> {
        ShellFixtures {
            shell: self,
            host_id: host_id.to_string(),
        }
    }
}

impl<'a> ShellFixtures<'a> {
    /// Docker avec ces containers (listing, trois inspects chacun, lookup global).
    pub fn docker(&self, fixtures: &[ContainerFixture]) -> &Self {
        let listing: Vec<String> = fixtures.iter().map(|c| c.listing_line()).collect();
        self.shell.reply(&self.host_id, &containers::list_command(), &listing.join("\n"));

        for c in fixtures {
            self.shell
                .reply(&self.host_id, &containers::labels_command(&c.id), &c.labels_json)
                .reply(&self.host_id, &containers::networks_command(&c.id), &c.network_line())
                .reply(
                    &self.host_id,
                    &containers::mode_command(&c.id),
                    &format!("{}|{}", c.network_mode, c.mac.as_deref().unwrap_or("")),
                );
        }

        let lookup: Vec<String> = fixtures.iter().map(|c| c.lookup_line()).collect();
        self.shell.reply(&self.host_id, &containers::lookup_command(), &lookup.join("\n"));
        self
    }

    /// `docker` absent du host
    pub fn no_docker(&self) -> &Self {
        self.shell
            .fail(&self.host_id, &containers::list_command(), 127, "sh: docker: command not found")
            .fail(&self.host_id, &containers::lookup_command(), 127, "sh: docker: command not found");
        self
    }

    /// Interfaces iproute2: (nom, "ip/prefix", mac)
    pub fn interfaces(&self, ifaces: &[(&str, &str, &str)]) -> &Self {
        let mut addr = vec!["1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever".to_string()];
        let mut link = vec!["1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN\\    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00".to_string()];
        for (i, (name, cidr, mac)) in ifaces.iter().enumerate() {
            let index = i + 2;
            addr.push(format!(
                "{index}: {name}    inet {cidr} scope global {name}\\       valid_lft forever preferred_lft forever"
            ));
            link.push(format!(
                "{index}: {name}: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 state UP\\    link/ether {mac} brd ff:ff:ff:ff:ff:ff"
            ));
        }
        self.shell
            .reply(&self.host_id, interfaces::ADDR_CANDIDATES[0], &addr.join("\n"))
            .reply(&self.host_id, interfaces::LINK_COMMAND, &link.join("\n"));
        self
    }

    /// Guests libvirt: (nom, en marche, [(mac, "ip/prefix")])
    pub fn virsh(&self, guests: &[(&str, bool, &[(&str, &str)])]) -> &Self {
        let names: Vec<&str> = guests.iter().map(|(name, _, _)| *name).collect();
        let running: Vec<&str> = guests.iter().filter(|(_, up, _)| *up).map(|(name, _, _)| *name).collect();
        self.shell
            .reply(&self.host_id, vms::LIST_ALL, &names.join("\n"))
            .reply(&self.host_id, vms::LIST_RUNNING, &running.join("\n"));

        for (name, _, addrs) in guests {
            let mut table = vec![
                " Name       MAC address          Protocol     Address".to_string(),
                "-------------------------------------------------------------------------------".to_string(),
            ];
            for (i, (mac, cidr)) in addrs.iter().enumerate() {
                table.push(format!(" vnet{i}      {mac}    ipv4         {cidr}"));
            }
            let [agent, lease] = vms::domifaddr_candidates(name);
            self.shell
                .fail(&self.host_id, &agent, 1, "error: Guest agent is not responding")
                .reply(&self.host_id, &lease, &table.join("\n"));
        }
        self
    }

    /// Debian 12 sain (os-release, noyau, charge, apt).
    pub fn debian_system(&self, hostname: &str) -> &Self {
        self.shell
            .reply(&self.host_id, "cat /etc/os-release", "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nNAME=\"Debian GNU/Linux\"\nVERSION_ID=\"12\"")
            .reply(&self.host_id, "hostname", hostname)
            .reply(&self.host_id, "uptime -p", "up 3 days, 4 hours")
            .reply(
                &self.host_id,
                "free -m",
                "               total        used        free      shared  buff/cache   available\nMem:           16000        4000        8000         100        4000       12000",
            )
            .reply(&self.host_id, "nproc", "4")
            .reply(&self.host_id, "uname -r", "6.1.0-18-amd64")
            .reply(&self.host_id, "uname -m", "x86_64")
            .reply(
                &self.host_id,
                "df -P /",
                "Filesystem     1024-blocks     Used Available Capacity Mounted on\n/dev/sda1        100000000 40000000  60000000      40% /",
            )
            .reply(&self.host_id, "cat /proc/loadavg", "0.42 0.35 0.30 1/300 4242")
            .reply(&self.host_id, "command -v apt-get", "/usr/bin/apt-get")
            .reply(&self.host_id, "apt list --upgradable 2>/dev/null | grep -c upgradable || true", "2")
            .reply(
                &self.host_id,
                "apt list --upgradable 2>/dev/null",
                "Listing...\nopenssl/bookworm-security 3.0.13 amd64 [upgradable from: 3.0.11]\ncurl/bookworm 7.88 amd64 [upgradable from: 7.87]",
            );
        self
    }

    /// tmux installé; la capture renvoie `pane`.
    pub fn tmux(&self, pane: &str) -> &Self {
        self.shell
            .reply(&self.host_id, "command -v tmux", "/usr/bin/tmux")
            .fail_prefix(&self.host_id, "tmux has-session", 1)
            .reply_prefix(&self.host_id, "tmux capture-pane", pane)
            .reply_prefix(&self.host_id, "tmux ", "");
        self
    }
}
